// file: src/orchestrator/phase.rs
// version: 1.0.0
// guid: 4f1d0c2e-8a3b-4b57-9e61-2d7c5a0b9f13

//! Bootstrap phases and the declared transitions between them

use crate::error::ProvisionError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The nine bootstrap phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    GenerateSecrets,
    AdminConfig,
    ApplyControlPlane,
    DetectBootstrap,
    Bootstrap,
    WaitApi,
    ApplyWorkers,
    WaitHealthy,
    ExtractCredentials,
}

impl Phase {
    pub const FIRST: Phase = Phase::GenerateSecrets;

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::GenerateSecrets => "generate-secrets",
            Phase::AdminConfig => "admin-config",
            Phase::ApplyControlPlane => "apply-control-plane",
            Phase::DetectBootstrap => "detect-bootstrap",
            Phase::Bootstrap => "bootstrap",
            Phase::WaitApi => "wait-api",
            Phase::ApplyWorkers => "apply-workers",
            Phase::WaitHealthy => "wait-healthy",
            Phase::ExtractCredentials => "extract-credentials",
        }
    }

    /// Look up the successor of `self` given how it finished.
    /// `Ok(None)` means the run is complete.
    pub fn next(self, outcome: PhaseOutcome) -> Result<Option<Phase>> {
        TRANSITIONS
            .iter()
            .find(|(from, on, _)| *from == self && *on == outcome)
            .map(|(_, _, to)| *to)
            .ok_or_else(|| {
                ProvisionError::Transition(format!("{} finished with {:?}", self, outcome))
            })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a phase finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Done,
    /// Membership probe found an existing cluster
    AlreadyBootstrapped,
    /// Health wait ran out of budget; the run continues degraded
    HealthTimedOut,
}

/// Every allowed `(phase, outcome) -> next` edge. Anything else is a bug.
pub const TRANSITIONS: &[(Phase, PhaseOutcome, Option<Phase>)] = &[
    (Phase::GenerateSecrets, PhaseOutcome::Done, Some(Phase::AdminConfig)),
    (Phase::AdminConfig, PhaseOutcome::Done, Some(Phase::ApplyControlPlane)),
    (Phase::ApplyControlPlane, PhaseOutcome::Done, Some(Phase::DetectBootstrap)),
    (Phase::DetectBootstrap, PhaseOutcome::Done, Some(Phase::Bootstrap)),
    (Phase::DetectBootstrap, PhaseOutcome::AlreadyBootstrapped, Some(Phase::WaitApi)),
    (Phase::Bootstrap, PhaseOutcome::Done, Some(Phase::WaitApi)),
    (Phase::WaitApi, PhaseOutcome::Done, Some(Phase::ApplyWorkers)),
    (Phase::ApplyWorkers, PhaseOutcome::Done, Some(Phase::WaitHealthy)),
    (Phase::WaitHealthy, PhaseOutcome::Done, Some(Phase::ExtractCredentials)),
    (Phase::WaitHealthy, PhaseOutcome::HealthTimedOut, Some(Phase::ExtractCredentials)),
    (Phase::ExtractCredentials, PhaseOutcome::Done, None),
];
