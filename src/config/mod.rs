// file: src/config/mod.rs
// version: 2.0.0
// guid: a1b2c3d4-e5f6-7a8b-9c0d-1e2f3a4b5c6d

//! Configuration module for the cluster bootstrap agent
//!
//! Handles loading and validation of cluster specifications and node endpoints.

pub mod cluster;
pub mod loader;

pub use cluster::{ClusterSpec, PhaseTimeouts, VersionPins};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Cluster flavor, selecting which lifecycle driver provisions the nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    /// Installer-script based, driven over SSH
    K3s,
    /// Agent based, driven through the local talosctl binary
    Talos,
}

impl ClusterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterKind::K3s => "k3s",
            ClusterKind::Talos => "talos",
        }
    }
}

impl std::str::FromStr for ClusterKind {
    type Err = crate::error::ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "k3s" => Ok(ClusterKind::K3s),
            "talos" => Ok(ClusterKind::Talos),
            _ => Err(crate::error::ProvisionError::validation(format!(
                "Unknown cluster kind: {}",
                s
            ))),
        }
    }
}

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Control,
    Worker,
}

impl NodeRole {
    /// Prefix used for fallback `role-N` hostnames
    pub fn hostname_prefix(&self) -> &'static str {
        match self {
            NodeRole::Control => "control-plane",
            NodeRole::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Control => write!(f, "control"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// Credential material used to reach a node over SSH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeAuth {
    /// No explicit material; the local SSH agent is tried as root
    #[default]
    None,
    Password {
        username: String,
        password: String,
    },
    Key {
        username: String,
        private_key_path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
    Agent {
        username: String,
    },
}

impl NodeAuth {
    pub fn username(&self) -> &str {
        match self {
            NodeAuth::None => "root",
            NodeAuth::Password { username, .. }
            | NodeAuth::Key { username, .. }
            | NodeAuth::Agent { username } => username,
        }
    }
}

/// One node of the fleet. Identity is the host address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Network address used to reach the node
    pub host: String,
    /// Advisory hostname baked into generated configuration
    #[serde(default)]
    pub hostname: Option<String>,
    /// Filled in from the list the node appears in
    #[serde(skip, default = "default_role")]
    pub role: NodeRole,
    #[serde(default)]
    pub auth: NodeAuth,
}

fn default_role() -> NodeRole {
    NodeRole::Worker
}

impl NodeEndpoint {
    pub fn new(host: impl Into<String>, role: NodeRole) -> Self {
        Self {
            host: host.into(),
            hostname: None,
            role,
            auth: NodeAuth::None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_auth(mut self, auth: NodeAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Caller-supplied hostname, or `role-N` (1-based) when none was given
    pub fn hostname_or_default(&self, index: usize) -> String {
        match &self.hostname {
            Some(h) if !h.trim().is_empty() => h.clone(),
            _ => format!("{}-{}", self.role.hostname_prefix(), index + 1),
        }
    }
}
