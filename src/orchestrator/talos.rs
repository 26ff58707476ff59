// file: src/orchestrator/talos.rs
// version: 1.0.1
// guid: e3c95a17-2b48-4d6f-8a01-7f4d6b2e9c38

//! Agent-based lifecycle driver (Talos through the local control tool)

use super::driver::{NodeLifecycleDriver, ReadyTarget};
use super::state::Credentials;
use crate::config::{ClusterKind, ClusterSpec, NodeEndpoint, NodeRole};
use crate::control::config_gen::TALOSCONFIG_FILE;
use crate::control::{BaseConfig, BaseConfigRequest, ConfigGenerator, ControlTool};
use crate::destroyer::ResetOutcome;
use crate::error::ProvisionError;
use crate::kubeconfig::rewrite_loopback;
use crate::poller::{Poller, ProbeStatus};
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Budget handed to a single `health` call; the poller retries around it
const HEALTH_ATTEMPT_TIMEOUT: &str = "60s";
const KUBECONFIG_FILE: &str = "kubeconfig";

pub struct TalosDriver {
    spec: ClusterSpec,
    tool: Arc<dyn ControlTool>,
    generator: ConfigGenerator,
    poller: Poller,
    base: Option<BaseConfig>,
}

impl TalosDriver {
    pub fn new(spec: ClusterSpec, tool: Arc<dyn ControlTool>, cancel: CancellationToken) -> Self {
        let generator = ConfigGenerator::new(tool.clone(), spec.working_dir());
        let poller = Poller::new(spec.timeouts.poll_interval(), cancel);
        Self {
            spec,
            tool,
            generator,
            poller,
            base: None,
        }
    }

    /// Driver able to reset nodes of an existing cluster. The stored admin profile
    /// is written back to the working directory when one is supplied.
    pub async fn for_destroy(
        spec: ClusterSpec,
        tool: Arc<dyn ControlTool>,
        credentials: Option<&Credentials>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let driver = Self::new(spec, tool, cancel);
        let wd = driver.generator.working_dir();
        tokio::fs::create_dir_all(wd).await?;

        match credentials.and_then(|c| c.talosconfig.as_ref()) {
            Some(profile) => tokio::fs::write(driver.profile(), profile).await?,
            None if driver.profile().exists() => {
                debug!("Using admin profile already in {}", wd.display())
            }
            None => {
                return Err(ProvisionError::config(format!(
                    "No admin profile for cluster {}: none stored and none in {}",
                    driver.spec.name,
                    wd.display()
                )))
            }
        }
        Ok(driver)
    }

    fn profile(&self) -> PathBuf {
        self.generator.working_dir().join(TALOSCONFIG_FILE)
    }

    fn first_host(&self) -> Result<String> {
        Ok(self.spec.first_control()?.host.clone())
    }

    async fn authed(&self, args: Vec<String>) -> Result<String> {
        let profile = self.profile();
        Ok(self
            .tool
            .run(self.generator.working_dir(), Some(&profile), &args)
            .await?)
    }

    fn base(&self) -> Result<&BaseConfig> {
        self.base.as_ref().ok_or_else(|| {
            ProvisionError::validation("Base machine configs have not been generated yet")
        })
    }
}

/// `<verb...> --nodes <host> --endpoints <host>`
fn targeted(verb: &[&str], host: &str) -> Vec<String> {
    let mut args: Vec<String> = verb.iter().map(|s| s.to_string()).collect();
    args.extend([
        "--nodes".to_string(),
        host.to_string(),
        "--endpoints".to_string(),
        host.to_string(),
    ]);
    args
}

/// Hostnames from `etcd members` rows; header and diagnostic lines are skipped
pub fn parse_etcd_members(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [_, id, hostname, peer, _client, ..]
                    if id.chars().all(|c| c.is_ascii_hexdigit()) && peer.contains("://") =>
                {
                    Some(hostname.to_string())
                }
                _ => None,
            }
        })
        .collect()
}

/// True when `service <name>` output reports `STATE Running`
pub fn service_running(output: &str) -> bool {
    output.lines().any(|line| {
        let mut fields = line.split_whitespace();
        fields.next() == Some("STATE") && fields.next() == Some("Running")
    })
}

async fn apply_config(
    tool: Arc<dyn ControlTool>,
    working_dir: PathBuf,
    profile: PathBuf,
    host: String,
    file: String,
) -> Result<ProbeStatus> {
    let insecure = vec![
        "apply-config".to_string(),
        "--insecure".to_string(),
        "--nodes".to_string(),
        host.clone(),
        "--file".to_string(),
        file.clone(),
    ];
    let first_err = match tool.run(&working_dir, None, &insecure).await {
        Ok(_) => return Ok(ProbeStatus::Ready),
        Err(e) => e,
    };

    // A node that already holds a config rejects the maintenance-mode channel.
    if !profile.exists() {
        return Ok(ProbeStatus::NotReady(first_err.to_string()));
    }
    let mut authed = targeted(&["apply-config"], &host);
    authed.extend(["--file".to_string(), file]);
    match tool.run(&working_dir, Some(&profile), &authed).await {
        Ok(_) => Ok(ProbeStatus::Ready),
        Err(e) => Ok(ProbeStatus::NotReady(format!(
            "insecure: {}; authenticated: {}",
            first_err, e
        ))),
    }
}

#[async_trait]
impl NodeLifecycleDriver for TalosDriver {
    fn kind(&self) -> ClusterKind {
        ClusterKind::Talos
    }

    async fn prepare(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(self.generator.working_dir()).await?;
        let secrets = self.generator.secrets_path();
        if tokio::fs::try_exists(&secrets).await? {
            info!("Reusing existing secrets bundle {}", secrets.display());
            return Ok(());
        }
        self.generator.generate_secrets().await?;
        Ok(())
    }

    async fn load_admin_config(&mut self) -> Result<()> {
        let request = BaseConfigRequest {
            cluster_name: &self.spec.name,
            endpoint: &self.spec.endpoint,
            install_disk: &self.spec.install_disk,
            talos_version: self.spec.versions.talos.as_deref(),
            kubernetes_version: self.spec.versions.kubernetes.as_deref(),
        };
        let base = self
            .generator
            .generate_base_config(&self.generator.secrets_path(), &request)
            .await?;

        let profile = tokio::fs::read(&base.talosconfig).await.map_err(|e| {
            ProvisionError::config(format!(
                "Admin profile {} not readable: {}",
                base.talosconfig.display(),
                e
            ))
        })?;
        debug!("Read admin profile ({} bytes)", profile.len());
        self.base = Some(base);

        let first = self.first_host()?;
        self.authed(vec!["config".into(), "endpoint".into(), first.clone()])
            .await?;
        self.authed(vec!["config".into(), "node".into(), first]).await?;
        Ok(())
    }

    async fn install_or_apply(&mut self, node: &NodeEndpoint, index: usize) -> Result<()> {
        let is_cp = node.role == NodeRole::Control;
        let template = match node.role {
            NodeRole::Control => self.base()?.controlplane.clone(),
            NodeRole::Worker => self.base()?.worker.clone(),
        };
        let hostname = node.hostname_or_default(index);
        let config = self
            .generator
            .patch(
                &template,
                &hostname,
                is_cp && self.spec.allow_scheduling_on_control_plane,
                is_cp,
            )
            .await?;
        let file = config
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.display().to_string());

        info!(host = %node.host, hostname = %hostname, "Applying machine config");
        let tool = self.tool.clone();
        let working_dir = self.generator.working_dir().to_path_buf();
        let profile = self.profile();
        let host = node.host.clone();
        self.poller
            .poll_until(
                &format!("{} to accept its machine config", node.host),
                self.spec.timeouts.apply_config(),
                || {
                    apply_config(
                        tool.clone(),
                        working_dir.clone(),
                        profile.clone(),
                        host.clone(),
                        file.clone(),
                    )
                },
            )
            .await
    }

    async fn members(&mut self) -> Result<Vec<String>> {
        let first = self.first_host()?;
        let out = self.authed(targeted(&["etcd", "members"], &first)).await?;
        Ok(parse_etcd_members(&out))
    }

    async fn bootstrap(&mut self) -> Result<()> {
        let first = self.first_host()?;
        info!(host = %first, "Bootstrapping etcd");
        self.authed(targeted(&["bootstrap"], &first)).await?;
        Ok(())
    }

    async fn wait_ready(&mut self, target: ReadyTarget, timeout: Duration) -> Result<()> {
        let first = self.first_host()?;
        let (what, args) = match target {
            ReadyTarget::ControlApi => (
                "etcd service to report Running".to_string(),
                targeted(&["service", "etcd"], &first),
            ),
            ReadyTarget::ClusterHealth => {
                let mut args = targeted(&["health"], &first);
                args.extend([
                    "--wait-timeout".to_string(),
                    HEALTH_ATTEMPT_TIMEOUT.to_string(),
                    "--control-plane-nodes".to_string(),
                    self.spec.control_hosts().join(","),
                ]);
                if !self.spec.workers.is_empty() {
                    args.extend([
                        "--worker-nodes".to_string(),
                        self.spec.worker_hosts().join(","),
                    ]);
                }
                ("cluster health".to_string(), args)
            }
        };

        let tool = self.tool.clone();
        let working_dir = self.generator.working_dir().to_path_buf();
        let profile = self.profile();
        self.poller
            .poll_until(&what, timeout, || {
                let tool = tool.clone();
                let working_dir = working_dir.clone();
                let profile = profile.clone();
                let args = args.clone();
                async move {
                    let out = tool.run(&working_dir, Some(&profile), &args).await?;
                    Ok(match target {
                        ReadyTarget::ClusterHealth => ProbeStatus::Ready,
                        ReadyTarget::ControlApi if service_running(&out) => ProbeStatus::Ready,
                        ReadyTarget::ControlApi => ProbeStatus::NotReady(out.trim().to_string()),
                    })
                }
            })
            .await
    }

    async fn fetch_credentials(&mut self) -> Result<Credentials> {
        let first = self.first_host()?;
        let mut args = targeted(&["kubeconfig", "."], &first);
        args.extend(["--merge=false".to_string(), "--force".to_string()]);
        self.authed(args).await?;

        let wd = self.generator.working_dir();
        let raw = tokio::fs::read_to_string(wd.join(KUBECONFIG_FILE)).await?;
        let kubeconfig = rewrite_loopback(&raw, &first).into_bytes();
        let talosconfig = read_optional(&self.profile()).await?;
        let secrets = read_optional(&self.generator.secrets_path()).await?;

        Ok(Credentials {
            kubeconfig,
            talosconfig,
            secrets,
        })
    }

    async fn teardown(&mut self, host: &str, _role: NodeRole) -> ResetOutcome {
        let mut args = targeted(&["reset"], host);
        args.extend([
            "--graceful=false".to_string(),
            "--reboot".to_string(),
            "--wait=false".to_string(),
        ]);
        let profile = self.profile();
        let outcome = ResetOutcome::from_exec(
            self.tool
                .run(self.generator.working_dir(), Some(&profile), &args)
                .await,
        );
        if let ResetOutcome::Failure(msg) = &outcome {
            warn!(host = %host, "Reset failed: {}", msg);
        }
        outcome
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
