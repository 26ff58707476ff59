// file: src/control/invoker.rs
// version: 1.0.0
// guid: 9a21921b-fba6-409e-8284-45fff260248b

//! Local control-tool invocation
//!
//! Each call is a fresh subprocess. All session state lives in the profile path handed to
//! [`ControlTool::run`]; nothing is read from the process environment, so one binary can be
//! driven concurrently against different nodes.

use crate::error::{ExecError, ExecErrorKind};
use crate::network::ExecResult;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

/// A node-lifecycle control CLI run as a subprocess
#[async_trait::async_trait]
pub trait ControlTool: Send + Sync {
    /// Run the tool in `working_dir`, optionally pointed at a config profile.
    /// Returns combined stdout and stderr.
    async fn run(&self, working_dir: &Path, profile: Option<&Path>, args: &[String])
        -> ExecResult<String>;
}

/// The `talosctl` binary
#[derive(Debug, Clone)]
pub struct Talosctl {
    binary: PathBuf,
    timeout: Duration,
}

impl Talosctl {
    /// Locate `talosctl` on PATH
    pub fn locate() -> crate::Result<Self> {
        let binary = which::which("talosctl").map_err(|e| {
            crate::error::ProvisionError::config(format!("talosctl not found on PATH: {}", e))
        })?;
        Ok(Self::with_binary(binary))
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Upper bound on a single invocation
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self, profile: Option<&Path>, args: &[String]) -> String {
        let mut parts = vec![self.binary.display().to_string()];
        if let Some(p) = profile {
            parts.push("--talosconfig".to_string());
            parts.push(p.display().to_string());
        }
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }
}

#[async_trait::async_trait]
impl ControlTool for Talosctl {
    async fn run(
        &self,
        working_dir: &Path,
        profile: Option<&Path>,
        args: &[String],
    ) -> ExecResult<String> {
        let shown = self.command_line(profile, args);
        debug!("Running in {}: {}", working_dir.display(), shown);

        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(p) = profile {
            cmd.arg("--talosconfig").arg(p);
        }
        cmd.args(args);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(ExecError::new(
                    ExecErrorKind::TimedOut,
                    shown,
                    format!("no result after {:?}", self.timeout),
                ))
            }
            Ok(Err(e)) => {
                let kind = if e.kind() == std::io::ErrorKind::NotFound {
                    ExecErrorKind::NotFound
                } else {
                    ExecErrorKind::Unreachable
                };
                return Err(ExecError::new(kind, shown, format!("Failed to spawn: {}", e)));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = stdout.to_string();
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        if !output.status.success() {
            let kind = classify_exit(output.status.code().unwrap_or(-1), &stderr);
            error!("{} failed ({})", shown, kind);
            return Err(ExecError::new(kind, shown, combined));
        }

        Ok(combined)
    }
}

/// Map a non-zero tool exit onto a connection-level kind when the tool reports one.
///
/// The tool speaks gRPC to node agents and only reports transport failures as text, so this
/// is the single place that text is inspected.
pub fn classify_exit(code: i32, stderr: &str) -> ExecErrorKind {
    let text = stderr.to_ascii_lowercase();
    const REFUSED: &[&str] = &[
        "connection refused",
        "no route to host",
        "code = unavailable",
        "network is unreachable",
    ];
    const TIMED_OUT: &[&str] = &["deadlineexceeded", "deadline exceeded", "i/o timeout"];
    const DROPPED: &[&str] = &["connection reset", "unexpected eof", "transport is closing"];

    if REFUSED.iter().any(|m| text.contains(m)) {
        ExecErrorKind::Unreachable
    } else if TIMED_OUT.iter().any(|m| text.contains(m)) {
        ExecErrorKind::TimedOut
    } else if DROPPED.iter().any(|m| text.contains(m)) {
        ExecErrorKind::Disconnected
    } else {
        ExecErrorKind::Exited(code)
    }
}
