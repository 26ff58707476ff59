// file: src/destroyer.rs
// version: 1.0.0
// guid: 91d4a7c3-5e2f-4b80-8c6a-0f3e7b2d1a54

//! Cluster teardown: reset every worker, then every control node, aggregating failures

use crate::config::NodeRole;
use crate::network::ExecResult;
use crate::orchestrator::NodeLifecycleDriver;
use crate::{ProvisionError, Result};
use std::fmt;
use tracing::{info, info_span, warn, Instrument};

/// Result of resetting one node.
///
/// A reset reboots the node, so losing the connection mid-call is the expected
/// consequence of a working reset rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Success,
    ExpectedDisconnect,
    Failure(String),
}

impl ResetOutcome {
    /// Classify a reset call by the executor's error kind
    pub fn from_exec(result: ExecResult<String>) -> Self {
        match result {
            Ok(_) => ResetOutcome::Success,
            Err(e) if e.kind.is_disconnect() => ResetOutcome::ExpectedDisconnect,
            Err(e) => ResetOutcome::Failure(e.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ResetOutcome::Failure(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReset {
    pub host: String,
    pub role: NodeRole,
    pub outcome: ResetOutcome,
}

/// Every node attempted, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyReport {
    pub nodes: Vec<NodeReset>,
}

impl DestroyReport {
    pub fn failures(&self) -> impl Iterator<Item = &NodeReset> {
        self.nodes.iter().filter(|n| n.outcome.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

impl fmt::Display for DestroyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<String> = self
            .failures()
            .map(|n| match &n.outcome {
                ResetOutcome::Failure(msg) => format!("{} ({}): {}", n.host, n.role, msg),
                _ => unreachable!("failures() only yields Failure outcomes"),
            })
            .collect();
        write!(
            f,
            "{} of {} nodes failed to reset",
            failed.len(),
            self.nodes.len()
        )?;
        if !failed.is_empty() {
            write!(f, ": {}", failed.join("; "))?;
        }
        Ok(())
    }
}

pub struct Destroyer {
    driver: Box<dyn NodeLifecycleDriver>,
}

impl Destroyer {
    pub fn new(driver: Box<dyn NodeLifecycleDriver>) -> Self {
        Self { driver }
    }

    /// Reset workers first, then control nodes. Every node is attempted; any
    /// genuine failure turns the whole call into [`ProvisionError::Destroy`].
    pub async fn destroy(&mut self, control: &[String], workers: &[String]) -> Result<DestroyReport> {
        let span = info_span!("destroy", kind = self.driver.kind().as_str());
        async move {
            let mut report = DestroyReport::default();
            let ordered = workers
                .iter()
                .map(|h| (h, NodeRole::Worker))
                .chain(control.iter().map(|h| (h, NodeRole::Control)));

            for (host, role) in ordered {
                info!(host = %host, role = %role, "Resetting node");
                let outcome = self.driver.teardown(host, role).await;
                match &outcome {
                    ResetOutcome::Success => info!(host = %host, "Reset complete"),
                    ResetOutcome::ExpectedDisconnect => {
                        info!(host = %host, "Node dropped the connection while resetting")
                    }
                    ResetOutcome::Failure(msg) => warn!(host = %host, error = %msg, "Reset failed"),
                }
                report.nodes.push(NodeReset {
                    host: host.clone(),
                    role,
                    outcome,
                });
            }

            if report.has_failures() {
                Err(ProvisionError::Destroy(report))
            } else {
                Ok(report)
            }
        }
        .instrument(span)
        .await
    }
}
