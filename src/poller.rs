// file: src/poller.rs
// version: 1.0.1
// guid: 0e3b037c-481d-43e7-9de2-f89d383208ea

//! Readiness poller: retry a cheap, side-effect-free probe until it reports ready or a
//! deadline passes.

use crate::error::ProvisionError;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a single probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ready,
    /// Not ready yet; carries what was observed for timeout diagnostics
    NotReady(String),
}

/// Fixed-interval poller bounded by a deadline and an optional cancellation token
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Evaluate `probe` until it returns [`ProbeStatus::Ready`].
    ///
    /// A probe error is treated like `NotReady`: it is recorded and the loop continues.
    /// Returns a timeout error carrying the last observation once `timeout` elapses, or
    /// [`ProvisionError::Cancelled`] if the token fires. A check already in flight is
    /// allowed to finish before cancellation is reported.
    pub async fn poll_until<F, Fut>(&self, what: &str, timeout: Duration, mut probe: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ProbeStatus>>,
    {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;
        let mut last = String::from("no probe completed");

        loop {
            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            attempt += 1;

            // Remote calls are not interrupted mid-flight; cancellation is observed once they return.
            let observed = tokio::time::timeout_at(deadline, probe()).await;

            match observed {
                Ok(Ok(ProbeStatus::Ready)) => {
                    debug!(what = %what, attempt = attempt, "Probe reported ready");
                    return Ok(());
                }
                Ok(Ok(ProbeStatus::NotReady(detail))) => last = detail,
                Ok(Err(ProvisionError::Cancelled)) => return Err(ProvisionError::Cancelled),
                Ok(Err(e)) => last = e.to_string(),
                Err(_) => last = format!("probe still running at deadline (previous: {})", last),
            }

            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisionError::timeout(what, last));
            }

            debug!(what = %what, attempt = attempt, last = %last, "Not ready, retrying");
            let wake = std::cmp::min(now + self.interval, deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProvisionError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}

/// Sleep for `delay`, returning early with [`ProvisionError::Cancelled`] if the token fires
pub async fn cancellable_sleep(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
