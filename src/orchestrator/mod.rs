// file: src/orchestrator/mod.rs
// version: 1.0.0
// guid: 0d6f3b82-a7e4-4c19-95b2-6e1a8c4f2d70

//! Cluster bootstrap orchestrator
//!
//! Walks the phase table from [`phase::TRANSITIONS`], delegating each step to the
//! [`NodeLifecycleDriver`] selected for the cluster kind.

pub mod driver;
pub mod k3s;
pub mod phase;
pub mod state;
pub mod talos;

pub use driver::{DriverFactory, NodeLifecycleDriver, ReadyTarget};
pub use phase::{Phase, PhaseOutcome};
pub use state::{ClusterState, ClusterStatus, Credentials};

use crate::config::ClusterSpec;
use crate::destroyer::{DestroyReport, Destroyer};
use crate::error::ProvisionError;
use crate::poller::cancellable_sleep;
use crate::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Orchestrator {
    factory: DriverFactory,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(factory: DriverFactory, cancel: CancellationToken) -> Self {
        Self { factory, cancel }
    }

    /// Bring the cluster described by `spec` up, or converge an existing one.
    ///
    /// Returns a complete state (`ready` or `degraded`) or the first fatal phase error.
    pub async fn provision_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState> {
        spec.validate()?;
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "provision",
            cluster = %spec.name,
            kind = spec.kind.as_str(),
            run_id = %run_id
        );

        async move {
            let mut driver = self.factory.driver_for(spec, self.cancel.clone());
            let state = self.run(driver.as_mut(), spec).await?;
            info!(status = %state.status, "Provisioning finished");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Reset every recorded node, workers first
    pub async fn destroy_cluster(
        &self,
        spec: &ClusterSpec,
        credentials: Option<&Credentials>,
        control: &[String],
        workers: &[String],
    ) -> Result<DestroyReport> {
        let driver = self
            .factory
            .destroy_driver(spec, credentials, self.cancel.clone())
            .await?;
        Destroyer::new(driver).destroy(control, workers).await
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ProvisionError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn run(
        &self,
        driver: &mut dyn NodeLifecycleDriver,
        spec: &ClusterSpec,
    ) -> Result<ClusterState> {
        let mut state = ClusterState::new(&spec.name);
        let mut phase = Some(Phase::FIRST);

        while let Some(current) = phase {
            self.check_cancelled()?;
            info!(phase = %current, "Starting phase");
            let outcome = self.step(current, driver, spec, &mut state).await?;
            state.completed_phases.push(current);
            phase = current.next(outcome)?;
        }

        if state.status == ClusterStatus::Bootstrapping {
            state.status = ClusterStatus::Ready;
        }
        Ok(state)
    }

    async fn step(
        &self,
        phase: Phase,
        driver: &mut dyn NodeLifecycleDriver,
        spec: &ClusterSpec,
        state: &mut ClusterState,
    ) -> Result<PhaseOutcome> {
        let wrap = |e: ProvisionError| e.in_phase(phase, None);

        match phase {
            Phase::GenerateSecrets => driver.prepare().await.map_err(wrap)?,
            Phase::AdminConfig => driver.load_admin_config().await.map_err(wrap)?,
            Phase::ApplyControlPlane => {
                for (index, node) in spec.control_plane.iter().enumerate() {
                    self.check_cancelled()?;
                    driver
                        .install_or_apply(node, index)
                        .await
                        .map_err(|e| e.in_phase(phase, Some(&node.host)))?;
                    state.record_control(&node.host);
                }
            }
            Phase::DetectBootstrap => {
                cancellable_sleep(spec.timeouts.bootstrap_settle(), &self.cancel).await?;
                match driver.members().await {
                    Ok(members) if !members.is_empty() => {
                        info!(members = members.len(), "Cluster already bootstrapped, skipping init");
                        state.bootstrap_skipped = true;
                        return Ok(PhaseOutcome::AlreadyBootstrapped);
                    }
                    Ok(_) => info!("No existing members found"),
                    Err(ProvisionError::Cancelled) => return Err(ProvisionError::Cancelled),
                    Err(e) => warn!("Membership probe failed, treating as not bootstrapped: {}", e),
                }
            }
            Phase::Bootstrap => driver.bootstrap().await.map_err(wrap)?,
            Phase::WaitApi => driver
                .wait_ready(ReadyTarget::ControlApi, spec.timeouts.api_ready())
                .await
                .map_err(wrap)?,
            Phase::ApplyWorkers => {
                for (index, node) in spec.workers.iter().enumerate() {
                    self.check_cancelled()?;
                    driver
                        .install_or_apply(node, index)
                        .await
                        .map_err(|e| e.in_phase(phase, Some(&node.host)))?;
                    state.record_worker(&node.host);
                }
            }
            Phase::WaitHealthy => {
                match driver
                    .wait_ready(ReadyTarget::ClusterHealth, spec.timeouts.cluster_health())
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_timeout() => {
                        warn!("Cluster health not confirmed, continuing degraded: {}", e);
                        state.status = ClusterStatus::Degraded;
                        return Ok(PhaseOutcome::HealthTimedOut);
                    }
                    Err(e) => return Err(wrap(e)),
                }
            }
            Phase::ExtractCredentials => {
                state.credentials = Some(driver.fetch_credentials().await.map_err(wrap)?);
            }
        }

        Ok(PhaseOutcome::Done)
    }
}
