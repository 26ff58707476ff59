// file: src/error.rs
// version: 3.0.0
// guid: 57b83a63-07b6-4534-aa6c-51e8797254e0

use crate::destroyer::DestroyReport;
use crate::orchestrator::phase::Phase;
use std::fmt;
use thiserror::Error;

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Classification of a failed remote command or control-tool invocation.
///
/// Connect-level kinds (`NotFound`, `Unreachable`, `AuthFailed`, `TimedOut`) mean the
/// command never ran to completion on the target. `Disconnected` means the channel dropped
/// mid-command. `Exited` is a command that ran and returned non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    NotFound,
    Unreachable,
    AuthFailed,
    TimedOut,
    Disconnected,
    Exited(i32),
}

impl ExecErrorKind {
    /// True when the command never reached the target
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            ExecErrorKind::NotFound
                | ExecErrorKind::Unreachable
                | ExecErrorKind::AuthFailed
                | ExecErrorKind::TimedOut
        )
    }

    /// True when the target went away (refused, timed out, or dropped the channel)
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ExecErrorKind::Unreachable | ExecErrorKind::TimedOut | ExecErrorKind::Disconnected
        )
    }
}

impl fmt::Display for ExecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecErrorKind::NotFound => write!(f, "executable not found"),
            ExecErrorKind::Unreachable => write!(f, "target unreachable"),
            ExecErrorKind::AuthFailed => write!(f, "authentication failed"),
            ExecErrorKind::TimedOut => write!(f, "timed out"),
            ExecErrorKind::Disconnected => write!(f, "connection dropped"),
            ExecErrorKind::Exited(code) => write!(f, "exited with code {}", code),
        }
    }
}

/// A failed remote command or tool invocation, carrying whatever output was captured
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} while running `{command}`{}", output_suffix(.output))]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub command: String,
    pub output: String,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            output: output.into(),
        }
    }

    /// See [`ExecErrorKind::is_connect`]
    pub fn is_connect(&self) -> bool {
        self.kind.is_connect()
    }
}

fn output_suffix(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

fn node_suffix(node: &Option<String>) -> String {
    node.as_ref()
        .map(|n| format!(" on node {}", n))
        .unwrap_or_default()
}

/// Error types for cluster provisioning
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Timed out waiting for {what}; last observed: {last}")]
    Timeout { what: String, last: String },

    #[error("Unexpected output: {0}")]
    Parse(String),

    #[error("Phase '{phase}' failed{}: {source}", node_suffix(.node))]
    Phase {
        phase: Phase,
        node: Option<String>,
        #[source]
        source: Box<ProvisionError>,
    },

    #[error("Undeclared phase transition: {0}")]
    Transition(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Destroy failed: {0}")]
    Destroy(DestroyReport),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisionError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new timeout error carrying the last observed failure
    pub fn timeout(what: impl Into<String>, last: impl Into<String>) -> Self {
        Self::Timeout {
            what: what.into(),
            last: last.into(),
        }
    }

    /// Create a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Attach phase and node context. Cancellation passes through untouched.
    pub fn in_phase(self, phase: Phase, node: Option<&str>) -> Self {
        match self {
            ProvisionError::Cancelled | ProvisionError::Phase { .. } => self,
            other => ProvisionError::Phase {
                phase,
                node: node.map(str::to_string),
                source: Box::new(other),
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProvisionError::Timeout { .. })
    }
}
