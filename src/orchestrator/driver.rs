// file: src/orchestrator/driver.rs
// version: 1.0.0
// guid: 2e8a61f0-93c4-4c1b-a7d2-5b0e4f8c6a19

//! Node lifecycle driver capability and the factory that selects one per cluster kind

use super::k3s::K3sDriver;
use super::state::Credentials;
use super::talos::TalosDriver;
use crate::config::{ClusterKind, ClusterSpec, NodeEndpoint, NodeRole};
use crate::control::ControlTool;
use crate::destroyer::ResetOutcome;
use crate::network::RemoteExecutor;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a readiness wait is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyTarget {
    /// The cluster's primary control API is serving
    ControlApi,
    /// Every node reports healthy
    ClusterHealth,
}

/// Flavor-specific node operations. The orchestrator owns the phase order;
/// drivers only know how to perform each step against their transport.
#[async_trait]
pub trait NodeLifecycleDriver: Send {
    fn kind(&self) -> ClusterKind;

    /// Phase 1: produce or reuse cluster-wide secret material
    async fn prepare(&mut self) -> Result<()>;

    /// Phase 2: make the admin profile available for authenticated calls
    async fn load_admin_config(&mut self) -> Result<()>;

    /// Phases 3 and 7: bring one node to the configured state.
    /// `index` is the node's position within its role list.
    async fn install_or_apply(&mut self, node: &NodeEndpoint, index: usize) -> Result<()>;

    /// Phase 4: existing cluster members as seen from the first control node
    async fn members(&mut self) -> Result<Vec<String>>;

    /// Phase 5: one-time cluster init against the first control node
    async fn bootstrap(&mut self) -> Result<()>;

    /// Phases 6 and 8
    async fn wait_ready(&mut self, target: ReadyTarget, timeout: Duration) -> Result<()>;

    /// Phase 9
    async fn fetch_credentials(&mut self) -> Result<Credentials>;

    /// Reset one node. Never fails; failures are reported through the outcome.
    async fn teardown(&mut self, host: &str, role: NodeRole) -> ResetOutcome;
}

/// Builds drivers from injected transports
#[derive(Clone)]
pub struct DriverFactory {
    executor: Arc<dyn RemoteExecutor>,
    tool: Arc<dyn ControlTool>,
}

impl DriverFactory {
    pub fn new(executor: Arc<dyn RemoteExecutor>, tool: Arc<dyn ControlTool>) -> Self {
        Self { executor, tool }
    }

    /// Driver for provisioning `spec`
    pub fn driver_for(
        &self,
        spec: &ClusterSpec,
        cancel: CancellationToken,
    ) -> Box<dyn NodeLifecycleDriver> {
        match spec.kind {
            ClusterKind::K3s => Box::new(K3sDriver::new(spec.clone(), self.executor.clone(), cancel)),
            ClusterKind::Talos => Box::new(TalosDriver::new(spec.clone(), self.tool.clone(), cancel)),
        }
    }

    /// Driver for tearing down a cluster provisioned earlier.
    /// The agent flavor needs the stored admin profile to authenticate resets.
    pub async fn destroy_driver(
        &self,
        spec: &ClusterSpec,
        credentials: Option<&Credentials>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn NodeLifecycleDriver>> {
        Ok(match spec.kind {
            ClusterKind::K3s => Box::new(K3sDriver::new(spec.clone(), self.executor.clone(), cancel)),
            ClusterKind::Talos => Box::new(
                TalosDriver::for_destroy(spec.clone(), self.tool.clone(), credentials, cancel).await?,
            ),
        })
    }
}
