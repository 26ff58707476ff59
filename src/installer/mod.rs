// file: src/installer/mod.rs
// version: 2.0.0
// guid: d6050323-f86b-418d-af79-6abff9bfd74e

//! Script-driven node installation (k3s) over a remote session
//!
//! Per-node state machine:
//! `Unchecked -> {AlreadyInstalled | NeedsInstall} -> Running -> ReadyForWorkers` (control only).

pub mod token;

pub use token::Token;

use crate::config::NodeRole;
use crate::error::ProvisionError;
use crate::network::RemoteSession;
use crate::poller::{Poller, ProbeStatus};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const K3S_BINARY: &str = "/usr/local/bin/k3s";
pub const INSTALL_SCRIPT_URL: &str = "https://get.k3s.io";
pub const INSTALL_SCRIPT_PATH: &str = "/tmp/k3s-install.sh";
pub const CONFIG_DIR: &str = "/etc/rancher/k3s";
pub const SERVER_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
pub const SERVER_UNINSTALL_SCRIPT: &str = "/usr/local/bin/k3s-uninstall.sh";
pub const AGENT_UNINSTALL_SCRIPT: &str = "/usr/local/bin/k3s-agent-uninstall.sh";
pub const NODE_LISTING_COMMAND: &str = "k3s kubectl get nodes -o wide --no-headers";
pub const API_READY_COMMAND: &str = "k3s kubectl get --raw=/readyz";

/// A session shared between sequential steps and poll probes
pub type SharedSession = Arc<Mutex<Box<dyn RemoteSession>>>;

pub fn share(session: Box<dyn RemoteSession>) -> SharedSession {
    Arc::new(Mutex::new(session))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Unchecked,
    AlreadyInstalled,
    NeedsInstall,
    Running,
    ReadyForWorkers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// No uninstall script present; nothing to remove
    AlreadyClean,
    Removed,
}

/// Environment handed to the install script. Unset or empty options are omitted.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub version: Option<String>,
    pub token: Option<Token>,
    pub server_url: Option<String>,
    /// Arguments for `INSTALL_K3S_EXEC` (e.g. `server --cluster-init`)
    pub exec: Vec<String>,
}

impl InstallOptions {
    pub fn env_assignments(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::new();
        let mut push = |key: &'static str, value: Option<&str>| {
            if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
                env.push((key, v.to_string()));
            }
        };

        push("INSTALL_K3S_VERSION", self.version.as_deref());
        push("K3S_URL", self.server_url.as_deref());
        push("K3S_TOKEN", self.token.as_ref().map(Token::as_str));
        let exec = self.exec.join(" ");
        push("INSTALL_K3S_EXEC", Some(exec.as_str()));
        env
    }
}

/// `KEY='VALUE' ... sh <script>`
pub fn build_install_command(options: &InstallOptions) -> String {
    let mut parts: Vec<String> = options
        .env_assignments()
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, shell_quote(&v)))
        .collect();
    parts.push(format!("sh {}", INSTALL_SCRIPT_PATH));
    parts.join(" ")
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Drives installation of one node through a remote session
pub struct NodeInstaller {
    session: SharedSession,
    host: String,
    hostname: Option<String>,
    role: NodeRole,
    state: InstallState,
}

impl NodeInstaller {
    pub fn new(session: SharedSession, host: impl Into<String>, hostname: Option<String>, role: NodeRole) -> Self {
        Self {
            session,
            host: host.into(),
            hostname,
            role,
            state: InstallState::Unchecked,
        }
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    fn service_name(&self) -> &'static str {
        match self.role {
            NodeRole::Control => "k3s",
            NodeRole::Worker => "k3s-agent",
        }
    }

    fn uninstall_script(&self) -> &'static str {
        match self.role {
            NodeRole::Control => SERVER_UNINSTALL_SCRIPT,
            NodeRole::Worker => AGENT_UNINSTALL_SCRIPT,
        }
    }

    async fn run(&self, description: &str, command: &str) -> Result<String> {
        info!("[{}] {}", self.host, description);
        Ok(self.session.lock().await.run(command).await?)
    }

    /// Install prerequisites: swap off and the config directory present
    pub async fn prepare(&mut self) -> Result<()> {
        self.run("Disabling swap", "swapoff -a").await?;
        self.run("Ensuring config directory", &format!("mkdir -p {}", CONFIG_DIR))
            .await?;
        Ok(())
    }

    /// Probe for the installed binary. A failing probe means "not installed".
    pub async fn detect(&mut self) -> Result<InstallState> {
        let installed = self
            .session
            .lock()
            .await
            .check(&format!("test -x {}", K3S_BINARY))
            .await?;
        self.state = if installed {
            info!("[{}] k3s already installed, skipping install script", self.host);
            InstallState::AlreadyInstalled
        } else {
            InstallState::NeedsInstall
        };
        Ok(self.state)
    }

    /// Install and start, or only (re)start when already installed
    pub async fn install(&mut self, options: &InstallOptions) -> Result<()> {
        if self.state == InstallState::Unchecked {
            self.detect().await?;
        }

        match self.state {
            InstallState::AlreadyInstalled => {
                self.run(
                    "Starting existing service",
                    &format!("systemctl enable --now {}", self.service_name()),
                )
                .await?;
            }
            InstallState::NeedsInstall => {
                self.run(
                    "Fetching install script",
                    &format!("curl -sfL {} -o {}", INSTALL_SCRIPT_URL, INSTALL_SCRIPT_PATH),
                )
                .await?;
                self.run("Running install script", &build_install_command(options))
                    .await?;
            }
            InstallState::Running | InstallState::ReadyForWorkers => return Ok(()),
            InstallState::Unchecked => unreachable!("detect always resolves the install state"),
        }

        self.state = InstallState::Running;
        Ok(())
    }

    /// Wait until this node reports itself Ready in the node listing (control nodes)
    pub async fn wait_ready(&mut self, poller: &Poller, timeout: Duration) -> Result<()> {
        wait_member_ready(
            &self.session,
            poller,
            timeout,
            &self.host,
            self.hostname.as_deref(),
        )
        .await?;
        if self.role == NodeRole::Control {
            self.state = InstallState::ReadyForWorkers;
        }
        Ok(())
    }

    /// Read the live join token from a server node
    pub async fn read_token(&self) -> Result<Token> {
        let raw = self
            .run("Reading join token", &format!("cat {}", SERVER_TOKEN_PATH))
            .await?;
        if raw.trim().is_empty() {
            return Err(ProvisionError::parse(format!(
                "empty join token on {}",
                self.host
            )));
        }
        Ok(Token::from(raw))
    }

    /// Run the uninstall script when present; a missing script means already clean
    pub async fn teardown(&mut self) -> Result<TeardownOutcome> {
        let script = self.uninstall_script();
        let present = self
            .session
            .lock()
            .await
            .check(&format!("test -f {}", script))
            .await?;
        if !present {
            info!("[{}] {} not present, node already clean", self.host, script);
            return Ok(TeardownOutcome::AlreadyClean);
        }

        self.run("Running uninstall script", script).await?;
        self.state = InstallState::Unchecked;
        Ok(TeardownOutcome::Removed)
    }
}

/// One row of `kubectl get nodes -o wide --no-headers`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRow {
    pub name: String,
    pub ready: bool,
    pub addresses: Vec<String>,
}

impl NodeRow {
    /// Exact field match on name or an address column
    pub fn matches(&self, address: &str, hostname: Option<&str>) -> bool {
        self.addresses.iter().any(|a| a == address)
            || self.name == address
            || hostname.map_or(false, |h| self.name == h)
    }
}

/// Parse node listing rows.
///
/// Columns: NAME STATUS ROLES AGE VERSION INTERNAL-IP EXTERNAL-IP OS-IMAGE ...
pub fn parse_node_listing(listing: &str) -> Vec<NodeRow> {
    listing
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 || fields[0] == "NAME" {
                return None;
            }
            let addresses = fields
                .iter()
                .skip(5)
                .take(2)
                .filter(|f| **f != "<none>")
                .map(|f| f.to_string())
                .collect();
            Some(NodeRow {
                name: fields[0].to_string(),
                ready: fields[1].split(',').any(|s| s == "Ready"),
                addresses,
            })
        })
        .collect()
}

/// Poll the listing on `observer` until the node at `address` is listed as Ready
pub async fn wait_member_ready(
    observer: &SharedSession,
    poller: &Poller,
    timeout: Duration,
    address: &str,
    hostname: Option<&str>,
) -> Result<()> {
    let what = format!("node {} to report Ready", address);
    poller
        .poll_until(&what, timeout, || {
            let session = observer.clone();
            let address = address.to_string();
            let hostname = hostname.map(str::to_string);
            async move {
                let listing = session.lock().await.run(NODE_LISTING_COMMAND).await?;
                let rows = parse_node_listing(&listing);
                Ok(
                    match rows.iter().find(|r| r.matches(&address, hostname.as_deref())) {
                        Some(row) if row.ready => ProbeStatus::Ready,
                        Some(row) => ProbeStatus::NotReady(format!("{} listed but not Ready", row.name)),
                        None => {
                            ProbeStatus::NotReady(format!("{} not in node listing", address))
                        }
                    },
                )
            }
        })
        .await
        .map_err(|e| {
            if e.is_timeout() {
                warn!("{}", e);
            }
            e
        })
}
