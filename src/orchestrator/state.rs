// file: src/orchestrator/state.rs
// version: 1.0.0
// guid: 7c2b9e44-1f63-4d0a-b8e5-3a6f2c91d7e8

//! Cluster state returned by a provisioning run and persisted by the caller

use super::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Bootstrapping,
    Ready,
    /// Provisioned, but health was not confirmed within budget
    Degraded,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterStatus::Bootstrapping => write!(f, "bootstrapping"),
            ClusterStatus::Ready => write!(f, "ready"),
            ClusterStatus::Degraded => write!(f, "degraded"),
        }
    }
}

/// Opaque credential blobs read back from the cluster
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Cluster API client config, loopback already rewritten
    #[serde(with = "base64_bytes")]
    pub kubeconfig: Vec<u8>,
    /// Control-tool admin profile (agent flavor)
    #[serde(default, with = "base64_opt_bytes", skip_serializing_if = "Option::is_none")]
    pub talosconfig: Option<Vec<u8>>,
    /// Raw secrets bundle (agent flavor)
    #[serde(default, with = "base64_opt_bytes", skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<u8>>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("kubeconfig", &format_args!("<{} bytes>", self.kubeconfig.len()))
            .field("talosconfig", &self.talosconfig.as_ref().map(Vec::len))
            .field("secrets", &self.secrets.as_ref().map(Vec::len))
            .finish()
    }
}

/// What the orchestrator believes succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub name: String,
    pub status: ClusterStatus,
    pub control_plane: Vec<String>,
    pub workers: Vec<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub completed_phases: Vec<Phase>,
    /// Set when the membership probe found an existing cluster
    #[serde(default)]
    pub bootstrap_skipped: bool,
}

impl ClusterState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ClusterStatus::Bootstrapping,
            control_plane: Vec::new(),
            workers: Vec::new(),
            credentials: None,
            completed_phases: Vec::new(),
            bootstrap_skipped: false,
        }
    }

    pub fn record_control(&mut self, host: &str) {
        if !self.control_plane.iter().any(|h| h == host) {
            self.control_plane.push(host.to_string());
        }
    }

    pub fn record_worker(&mut self, host: &str) {
        if !self.workers.iter().any(|h| h == host) {
            self.workers.push(host.to_string());
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_opt_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}
