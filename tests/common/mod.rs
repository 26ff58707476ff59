// file: tests/common/mod.rs
// version: 1.0.0
// guid: 6a1f0e3d-8b27-4c95-a4d8-2f7c9e1b5a36

//! Recording fakes for the remote executor and the control tool

#![allow(dead_code)]

use async_trait::async_trait;
use cluster_bootstrap_agent::{
    config::{ClusterKind, ClusterSpec, NodeAuth, NodeEndpoint, NodeRole, PhaseTimeouts},
    error::{ExecError, ExecErrorKind},
    network::{ExecResult, RemoteExecutor, RemoteSession},
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const LOOPBACK_KUBECONFIG: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTg==
    server: https://127.0.0.1:6443
  name: default
kind: Config
";

/// Budgets that keep tests fast: no settle delay, probes that succeed first time
pub fn fast_timeouts() -> PhaseTimeouts {
    PhaseTimeouts {
        apply_config: 5,
        bootstrap_settle: 0,
        api_ready: 5,
        node_ready: 5,
        cluster_health: 5,
        poll_interval: 1,
    }
}

pub fn cluster_spec(kind: ClusterKind, workers: usize, working_dir: &Path) -> ClusterSpec {
    let control = vec![NodeEndpoint::new("10.0.0.1", NodeRole::Control)];
    let workers = (0..workers)
        .map(|i| NodeEndpoint::new(format!("10.0.0.{}", i + 10), NodeRole::Worker))
        .collect();
    let mut spec = ClusterSpec::new("turing", kind, "https://10.0.0.1:6443", control, workers);
    spec.timeouts = fast_timeouts();
    spec.working_dir = Some(working_dir.to_path_buf());
    spec
}

/// Control tool that answers by argument prefix, records every call, and writes the
/// files the real tool would leave in the working directory
#[derive(Default)]
pub struct ScriptedTool {
    responses: Mutex<Vec<(String, Result<String, ExecErrorKind>)>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedTool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, prefix: &str, response: Result<&str, ExecErrorKind>) {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.to_string(), response.map(str::to_string)));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    /// Index of the first call starting with `prefix`
    pub fn position(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .position(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("no call starting with {:?} in {:?}", prefix, self.calls()))
    }

    fn write_outputs(working_dir: &Path, args: &[String]) {
        let line = args.join(" ");
        if line.starts_with("gen secrets") {
            fs::write(working_dir.join("secrets.yaml"), "cluster:\n  id: abc\n").unwrap();
        } else if line.starts_with("gen config") {
            fs::write(working_dir.join("controlplane.yaml"), "machine:\n  type: controlplane\n").unwrap();
            fs::write(working_dir.join("worker.yaml"), "machine:\n  type: worker\n").unwrap();
            fs::write(working_dir.join("talosconfig"), "context: turing\n").unwrap();
        } else if line.starts_with("machineconfig patch") {
            if let Some(i) = args.iter().position(|a| a == "--output") {
                fs::write(working_dir.join(&args[i + 1]), "patched\n").unwrap();
            }
        } else if line.starts_with("kubeconfig") {
            fs::write(working_dir.join("kubeconfig"), LOOPBACK_KUBECONFIG).unwrap();
        }
    }
}

#[async_trait]
impl cluster_bootstrap_agent::control::ControlTool for ScriptedTool {
    async fn run(
        &self,
        working_dir: &Path,
        _profile: Option<&Path>,
        args: &[String],
    ) -> ExecResult<String> {
        let line = args.join(" ");
        self.calls.lock().unwrap().push(line.clone());

        let response = self
            .responses
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, r)| r.clone());

        match response {
            Some(Err(kind)) => Err(ExecError::new(kind, line, "scripted failure")),
            Some(Ok(out)) => {
                Self::write_outputs(working_dir, args);
                Ok(out)
            }
            None => {
                Self::write_outputs(working_dir, args);
                Ok(String::new())
            }
        }
    }
}

/// Simulated k3s fleet shared by every session the executor opens
#[derive(Default)]
pub struct FleetState {
    pub installed: HashSet<String>,
    pub unreachable: HashSet<String>,
    /// `host: command` in execution order
    pub log: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeFleet {
    pub state: Arc<Mutex<FleetState>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_installed(&self, host: &str) {
        self.state.lock().unwrap().installed.insert(host.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn commands_on(&self, host: &str) -> Vec<String> {
        let prefix = format!("{}: ", host);
        self.log()
            .into_iter()
            .filter_map(|l| l.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for FakeFleet {
    async fn connect(
        &self,
        host: &str,
        _port: u16,
        _auth: &NodeAuth,
    ) -> ExecResult<Box<dyn RemoteSession>> {
        if self.state.lock().unwrap().unreachable.contains(host) {
            return Err(ExecError::new(
                ExecErrorKind::Unreachable,
                format!("ssh {}", host),
                "connection refused",
            ));
        }
        Ok(Box::new(FakeSession {
            host: host.to_string(),
            fleet: self.state.clone(),
        }))
    }
}

pub struct FakeSession {
    host: String,
    fleet: Arc<Mutex<FleetState>>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&mut self, command: &str) -> ExecResult<String> {
        let mut fleet = self.fleet.lock().unwrap();
        fleet.log.push(format!("{}: {}", self.host, command));
        let exited = || Err(ExecError::new(ExecErrorKind::Exited(1), command, ""));

        if command == "test -x /usr/local/bin/k3s" {
            return if fleet.installed.contains(&self.host) {
                Ok(String::new())
            } else {
                exited()
            };
        }
        if command.ends_with("sh /tmp/k3s-install.sh") {
            fleet.installed.insert(self.host.clone());
            return Ok("[INFO]  systemd: Starting k3s\n".to_string());
        }
        if command.starts_with("k3s kubectl get nodes") {
            let mut hosts: Vec<_> = fleet.installed.iter().cloned().collect();
            hosts.sort();
            return Ok(hosts
                .iter()
                .map(|h| {
                    format!(
                        "node-{} Ready <none> 1m v1.29.4+k3s1 {} <none> Ubuntu 22.04.4 LTS 5.10.160 containerd://1.7.15\n",
                        h.replace('.', "-"),
                        h
                    )
                })
                .collect());
        }
        match command {
            "k3s kubectl get --raw=/readyz" => Ok("ok".to_string()),
            "cat /var/lib/rancher/k3s/server/node-token" => Ok("K10abc::server:s3cret\n".to_string()),
            "cat /etc/rancher/k3s/k3s.yaml" => Ok(LOOPBACK_KUBECONFIG.to_string()),
            _ => Ok(String::new()),
        }
    }

    async fn close(&mut self) {}
}
