// file: src/config/cluster.rs
// version: 1.0.1
// guid: 3628ee82-48d9-41c4-a483-65656e27d5ed

//! Cluster specification consumed by the orchestrator

use super::{ClusterKind, NodeEndpoint, NodeRole};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Default install disk for Talos nodes (compute-module eMMC)
pub const DEFAULT_INSTALL_DISK: &str = "/dev/mmcblk0";

/// Desired cluster, immutable once validated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name
    pub name: String,
    /// Cluster flavor
    pub kind: ClusterKind,
    /// Cluster API endpoint URL (e.g. https://10.0.0.10:6443)
    pub endpoint: String,
    /// Version pins passed to installers and config generation
    #[serde(default)]
    pub versions: VersionPins,
    /// Talos install disk
    #[serde(default = "default_install_disk")]
    pub install_disk: String,
    /// k3s pod CIDR
    #[serde(default)]
    pub pod_cidr: Option<String>,
    /// k3s service CIDR
    #[serde(default)]
    pub service_cidr: Option<String>,
    /// k3s join token; generated when absent
    #[serde(default)]
    pub token: Option<String>,
    pub control_plane: Vec<NodeEndpoint>,
    #[serde(default)]
    pub workers: Vec<NodeEndpoint>,
    #[serde(default)]
    pub allow_scheduling_on_control_plane: bool,
    #[serde(default)]
    pub timeouts: PhaseTimeouts,
    /// Directory the control tool writes secrets and configs into (Talos)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

/// Version pins. Unset pins fall back to the tool's default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPins {
    #[serde(default)]
    pub k3s: Option<String>,
    #[serde(default)]
    pub talos: Option<String>,
    #[serde(default)]
    pub kubernetes: Option<String>,
}

/// Per-phase time budgets, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimeouts {
    pub apply_config: u64,
    pub bootstrap_settle: u64,
    pub api_ready: u64,
    pub node_ready: u64,
    pub cluster_health: u64,
    pub poll_interval: u64,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            apply_config: 300,
            bootstrap_settle: 30,
            api_ready: 600,
            node_ready: 300,
            cluster_health: 600,
            poll_interval: 5,
        }
    }
}

impl PhaseTimeouts {
    pub fn apply_config(&self) -> Duration {
        Duration::from_secs(self.apply_config)
    }

    pub fn bootstrap_settle(&self) -> Duration {
        Duration::from_secs(self.bootstrap_settle)
    }

    pub fn api_ready(&self) -> Duration {
        Duration::from_secs(self.api_ready)
    }

    pub fn node_ready(&self) -> Duration {
        Duration::from_secs(self.node_ready)
    }

    pub fn cluster_health(&self) -> Duration {
        Duration::from_secs(self.cluster_health)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

fn default_install_disk() -> String {
    DEFAULT_INSTALL_DISK.to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl ClusterSpec {
    /// Minimal spec with one control node and defaults everywhere else
    pub fn new(
        name: impl Into<String>,
        kind: ClusterKind,
        endpoint: impl Into<String>,
        control_plane: Vec<NodeEndpoint>,
        workers: Vec<NodeEndpoint>,
    ) -> Self {
        let mut spec = Self {
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            versions: VersionPins::default(),
            install_disk: default_install_disk(),
            pod_cidr: None,
            service_cidr: None,
            token: None,
            control_plane,
            workers,
            allow_scheduling_on_control_plane: false,
            timeouts: PhaseTimeouts::default(),
            working_dir: None,
            ssh_port: default_ssh_port(),
        };
        spec.assign_roles();
        spec
    }

    /// Stamp each node with the role of the list it appears in
    pub fn assign_roles(&mut self) {
        for node in &mut self.control_plane {
            node.role = NodeRole::Control;
        }
        for node in &mut self.workers {
            node.role = NodeRole::Worker;
        }
    }

    /// First control-plane node; bootstrap and health queries target it
    pub fn first_control(&self) -> crate::Result<&NodeEndpoint> {
        self.control_plane.first().ok_or_else(|| {
            crate::error::ProvisionError::validation("At least one control-plane node is required")
        })
    }

    /// Working directory for tool output, defaulting to `./<name>`
    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.name))
    }

    pub fn control_hosts(&self) -> Vec<String> {
        self.control_plane.iter().map(|n| n.host.clone()).collect()
    }

    pub fn worker_hosts(&self) -> Vec<String> {
        self.workers.iter().map(|n| n.host.clone()).collect()
    }

    /// Validate the cluster specification
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::error::ProvisionError::validation(
                "Cluster name cannot be empty",
            ));
        }

        let endpoint = url::Url::parse(&self.endpoint).map_err(|e| {
            crate::error::ProvisionError::validation(format!(
                "Invalid cluster endpoint {}: {}",
                self.endpoint, e
            ))
        })?;
        if endpoint.host_str().is_none() {
            return Err(crate::error::ProvisionError::validation(format!(
                "Cluster endpoint has no host: {}",
                self.endpoint
            )));
        }

        if self.control_plane.is_empty() {
            return Err(crate::error::ProvisionError::validation(
                "At least one control-plane node is required",
            ));
        }

        let mut seen = HashSet::new();
        for node in self.control_plane.iter().chain(self.workers.iter()) {
            if node.host.trim().is_empty() {
                return Err(crate::error::ProvisionError::validation(
                    "Node host address cannot be empty",
                ));
            }
            if !seen.insert(node.host.as_str()) {
                return Err(crate::error::ProvisionError::validation(format!(
                    "Node {} is listed more than once",
                    node.host
                )));
            }
            // Hostnames name the per-node files in the working directory.
            if let Some(hostname) = &node.hostname {
                if hostname.trim().is_empty()
                    || hostname.contains('/')
                    || hostname.contains('\\')
                    || hostname.contains("..")
                {
                    return Err(crate::error::ProvisionError::validation(format!(
                        "Invalid hostname {:?} for node {}",
                        hostname, node.host
                    )));
                }
            }
        }

        if self.kind == ClusterKind::Talos && !self.install_disk.starts_with("/dev/") {
            return Err(crate::error::ProvisionError::validation(format!(
                "Invalid install disk: {}",
                self.install_disk
            )));
        }

        if self.timeouts.poll_interval == 0 {
            return Err(crate::error::ProvisionError::validation(
                "Poll interval must be at least one second",
            ));
        }

        Ok(())
    }
}
