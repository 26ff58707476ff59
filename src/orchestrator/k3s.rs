// file: src/orchestrator/k3s.rs
// version: 1.0.1
// guid: 5b7e2d90-0c4a-4f38-b6e1-9a2c8d3f7e05

//! Script-driven lifecycle driver (k3s over SSH)

use super::driver::{NodeLifecycleDriver, ReadyTarget};
use super::state::Credentials;
use crate::config::{ClusterKind, ClusterSpec, NodeAuth, NodeEndpoint, NodeRole};
use crate::destroyer::ResetOutcome;
use crate::error::ProvisionError;
use crate::installer::{
    parse_node_listing, share, wait_member_ready, InstallOptions, InstallState, NodeInstaller,
    NodeRow, SharedSession, TeardownOutcome, Token, API_READY_COMMAND, KUBECONFIG_PATH,
    NODE_LISTING_COMMAND,
};
use crate::kubeconfig::rewrite_loopback;
use crate::network::RemoteExecutor;
use crate::poller::{Poller, ProbeStatus};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct K3sDriver {
    spec: ClusterSpec,
    executor: Arc<dyn RemoteExecutor>,
    poller: Poller,
    /// Join token handed to every node after the initiator
    token: Option<Token>,
    /// Session to the first control node, kept for probes
    first: Option<SharedSession>,
    /// The initiator already carried an install before this run
    preexisting: bool,
}

impl K3sDriver {
    pub fn new(spec: ClusterSpec, executor: Arc<dyn RemoteExecutor>, cancel: CancellationToken) -> Self {
        let poller = Poller::new(spec.timeouts.poll_interval(), cancel);
        Self {
            spec,
            executor,
            poller,
            token: None,
            first: None,
            preexisting: false,
        }
    }

    async fn connect(&self, host: &str, auth: &NodeAuth) -> Result<SharedSession> {
        let session = self.executor.connect(host, self.spec.ssh_port, auth).await?;
        Ok(share(session))
    }

    fn auth_for(&self, host: &str) -> NodeAuth {
        self.spec
            .control_plane
            .iter()
            .chain(self.spec.workers.iter())
            .find(|n| n.host == host)
            .map(|n| n.auth.clone())
            .unwrap_or_default()
    }

    /// Session to the first control node, opened on demand
    async fn first_session(&mut self) -> Result<SharedSession> {
        if let Some(s) = &self.first {
            return Ok(s.clone());
        }
        let first = self.spec.first_control()?.clone();
        let session = self.connect(&first.host, &first.auth).await?;
        self.first = Some(session.clone());
        Ok(session)
    }

    fn server_exec(&self, node: &NodeEndpoint, index: usize, initiator: bool) -> Vec<String> {
        let mut exec = vec!["server".to_string()];
        if initiator && self.spec.control_plane.len() > 1 {
            exec.push("--cluster-init".to_string());
        }
        if let Some(cidr) = &self.spec.pod_cidr {
            exec.push(format!("--cluster-cidr={}", cidr));
        }
        if let Some(cidr) = &self.spec.service_cidr {
            exec.push(format!("--service-cidr={}", cidr));
        }
        if let Some(host) = url::Url::parse(&self.spec.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        {
            exec.push(format!("--tls-san={}", host));
        }
        exec.push(format!("--node-name={}", node.hostname_or_default(index)));
        if !self.spec.allow_scheduling_on_control_plane {
            exec.push("--node-taint=node-role.kubernetes.io/control-plane:NoSchedule".to_string());
        }
        exec
    }

    fn join_token(&self) -> Result<Token> {
        self.token.clone().ok_or_else(|| {
            ProvisionError::validation("No join token available; the first control node must be installed first")
        })
    }

    async fn install_initiator(&mut self, node: &NodeEndpoint) -> Result<()> {
        let session = self.connect(&node.host, &node.auth).await?;
        let mut inst = NodeInstaller::new(session.clone(), &node.host, node.hostname.clone(), NodeRole::Control);
        inst.prepare().await?;
        self.preexisting = inst.detect().await? == InstallState::AlreadyInstalled;
        inst.install(&InstallOptions {
            version: self.spec.versions.k3s.clone(),
            token: self.spec.token.clone().map(Token::from),
            server_url: None,
            exec: self.server_exec(node, 0, true),
        })
        .await?;
        inst.wait_ready(&self.poller, self.spec.timeouts.node_ready()).await?;

        self.token = Some(inst.read_token().await?);
        info!(host = %node.host, "Control plane ready for workers");
        self.first = Some(session);
        Ok(())
    }

    async fn install_joining(&mut self, node: &NodeEndpoint, index: usize) -> Result<()> {
        let token = self.join_token()?;
        let session = self.connect(&node.host, &node.auth).await?;
        let mut inst = NodeInstaller::new(session.clone(), &node.host, node.hostname.clone(), node.role);
        inst.prepare().await?;

        let options = match node.role {
            NodeRole::Control => InstallOptions {
                version: self.spec.versions.k3s.clone(),
                token: Some(token),
                server_url: Some(self.spec.endpoint.clone()),
                exec: self.server_exec(node, index, false),
            },
            NodeRole::Worker => InstallOptions {
                version: self.spec.versions.k3s.clone(),
                token: Some(token),
                server_url: Some(self.spec.endpoint.clone()),
                exec: vec![
                    "agent".to_string(),
                    format!("--node-name={}", node.hostname_or_default(index)),
                ],
            },
        };
        inst.install(&options).await?;
        session.lock().await.close().await;

        let observer = self.first_session().await?;
        wait_member_ready(
            &observer,
            &self.poller,
            self.spec.timeouts.node_ready(),
            &node.host,
            node.hostname.as_deref(),
        )
        .await
    }
}

/// Hosts from `nodes` without a Ready row in the listing
fn unready_nodes(rows: &[NodeRow], nodes: &[(String, Option<String>)]) -> Vec<String> {
    nodes
        .iter()
        .filter(|(host, hostname)| {
            !rows
                .iter()
                .any(|row| row.ready && row.matches(host, hostname.as_deref()))
        })
        .map(|(host, _)| host.clone())
        .collect()
}

#[async_trait]
impl NodeLifecycleDriver for K3sDriver {
    fn kind(&self) -> ClusterKind {
        ClusterKind::K3s
    }

    async fn prepare(&mut self) -> Result<()> {
        if self.spec.token.is_some() {
            debug!("Using caller-supplied join token for the initiating server");
        }
        Ok(())
    }

    async fn load_admin_config(&mut self) -> Result<()> {
        // Servers write their own client config; it is read back in `fetch_credentials`.
        Ok(())
    }

    async fn install_or_apply(&mut self, node: &NodeEndpoint, index: usize) -> Result<()> {
        if node.role == NodeRole::Control && index == 0 {
            self.install_initiator(node).await
        } else {
            self.install_joining(node, index).await
        }
    }

    async fn members(&mut self) -> Result<Vec<String>> {
        // Phase 3 installs the initiator, so only a cluster found before that counts.
        if !self.preexisting {
            return Ok(Vec::new());
        }
        let session = self.first_session().await?;
        let listing = session.lock().await.run(NODE_LISTING_COMMAND).await?;
        Ok(parse_node_listing(&listing)
            .into_iter()
            .map(|row| row.name)
            .collect())
    }

    async fn bootstrap(&mut self) -> Result<()> {
        // The initiating server runs cluster init during its install.
        Ok(())
    }

    async fn wait_ready(&mut self, target: ReadyTarget, timeout: Duration) -> Result<()> {
        let session = self.first_session().await?;
        let nodes: Arc<Vec<(String, Option<String>)>> = Arc::new(
            self.spec
                .control_plane
                .iter()
                .chain(self.spec.workers.iter())
                .map(|n| (n.host.clone(), n.hostname.clone()))
                .collect(),
        );
        let what = match target {
            ReadyTarget::ControlApi => "API server /readyz".to_string(),
            ReadyTarget::ClusterHealth => format!("{} nodes to report Ready", nodes.len()),
        };

        self.poller
            .poll_until(&what, timeout, || {
                let session = session.clone();
                let nodes = nodes.clone();
                async move {
                    let mut s = session.lock().await;
                    match target {
                        ReadyTarget::ControlApi => {
                            let out = s.run(API_READY_COMMAND).await?;
                            Ok(if out.trim() == "ok" {
                                ProbeStatus::Ready
                            } else {
                                ProbeStatus::NotReady(out.trim().to_string())
                            })
                        }
                        ReadyTarget::ClusterHealth => {
                            let rows = parse_node_listing(&s.run(NODE_LISTING_COMMAND).await?);
                            let pending = unready_nodes(&rows, &nodes);
                            Ok(if pending.is_empty() {
                                ProbeStatus::Ready
                            } else {
                                ProbeStatus::NotReady(format!("not Ready: {}", pending.join(", ")))
                            })
                        }
                    }
                }
            })
            .await
    }

    async fn fetch_credentials(&mut self) -> Result<Credentials> {
        let first = self.spec.first_control()?.host.clone();
        let session = self.first_session().await?;
        let raw = session
            .lock()
            .await
            .run(&format!("cat {}", KUBECONFIG_PATH))
            .await?;
        if raw.trim().is_empty() {
            return Err(ProvisionError::parse(format!("empty kubeconfig on {}", first)));
        }
        Ok(Credentials {
            kubeconfig: rewrite_loopback(&raw, &first).into_bytes(),
            talosconfig: None,
            secrets: None,
        })
    }

    async fn teardown(&mut self, host: &str, role: NodeRole) -> ResetOutcome {
        let auth = self.auth_for(host);
        let session = match self.executor.connect(host, self.spec.ssh_port, &auth).await {
            Ok(s) => share(s),
            Err(e) => return ResetOutcome::from_exec(Err(e)),
        };
        let mut inst = NodeInstaller::new(session.clone(), host, None, role);
        let outcome = match inst.teardown().await {
            Ok(TeardownOutcome::AlreadyClean) | Ok(TeardownOutcome::Removed) => ResetOutcome::Success,
            Err(ProvisionError::Exec(e)) => ResetOutcome::from_exec(Err(e)),
            Err(e) => ResetOutcome::Failure(e.to_string()),
        };
        session.lock().await.close().await;
        if let ResetOutcome::Failure(msg) = &outcome {
            warn!(host = %host, "Uninstall failed: {}", msg);
        }
        outcome
    }
}
