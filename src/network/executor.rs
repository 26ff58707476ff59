// file: src/network/executor.rs
// version: 2.0.0
// guid: exec0001-2345-6789-abcd-ef0123456789

//! Remote command execution traits
//!
//! A [`RemoteExecutor`] opens sessions; a [`RemoteSession`] runs one command at a time to
//! completion. Neither layer retries. Callers that need retry wrap calls in the poller.

use crate::config::NodeAuth;
use crate::error::{ExecError, ExecErrorKind};
use regex::Regex;
use std::sync::OnceLock;

pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Factory for authenticated command sessions against one host:port
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Open an authenticated session
    async fn connect(&self, host: &str, port: u16, auth: &NodeAuth)
        -> ExecResult<Box<dyn RemoteSession>>;
}

/// An open command channel to a single host
#[async_trait::async_trait]
pub trait RemoteSession: Send {
    /// Host this session is connected to
    fn host(&self) -> &str;

    /// Run a command to completion, returning combined stdout and stderr.
    /// Non-zero exit surfaces as [`ExecErrorKind::Exited`] carrying the output.
    async fn run(&mut self, command: &str) -> ExecResult<String>;

    /// Close the session
    async fn close(&mut self);

    /// Run a command as a boolean check.
    /// Ok(true) on exit 0, Ok(false) on non-zero, Err on transport issues.
    async fn check(&mut self, command: &str) -> ExecResult<bool> {
        match self.run(command).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind, ExecErrorKind::Exited(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Mask join tokens and passwords in a command line before it is logged or stored
pub fn redact_command(command: &str) -> String {
    static SECRET_ASSIGNMENT: OnceLock<Regex> = OnceLock::new();
    let re = SECRET_ASSIGNMENT.get_or_init(|| {
        Regex::new(r"(?i)\b([A-Z0-9_]*(?:TOKEN|PASSWORD|SECRET)=)('[^']*'|\S+)")
            .expect("static redaction pattern")
    });
    re.replace_all(command, "${1}<redacted>").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSession {
        exit: Option<ExecErrorKind>,
    }

    #[async_trait::async_trait]
    impl RemoteSession for ScriptedSession {
        fn host(&self) -> &str {
            "10.0.0.1"
        }

        async fn run(&mut self, command: &str) -> ExecResult<String> {
            match self.exit {
                None => Ok(String::new()),
                Some(kind) => Err(ExecError::new(kind, command, "")),
            }
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_check_maps_exit_to_false_and_keeps_transport_errors() {
        let mut ok = ScriptedSession { exit: None };
        assert!(ok.check("true").await.unwrap());

        let mut failed = ScriptedSession {
            exit: Some(ExecErrorKind::Exited(1)),
        };
        assert!(!failed.check("false").await.unwrap());

        let mut dropped = ScriptedSession {
            exit: Some(ExecErrorKind::Unreachable),
        };
        assert!(dropped.check("true").await.is_err());
    }

    #[test]
    fn test_redact_command_masks_tokens() {
        let cmd = "INSTALL_K3S_VERSION='v1.29.4+k3s1' K3S_TOKEN='deadbeef' K3S_URL='https://a:6443' sh /tmp/k3s-install.sh";
        let redacted = redact_command(cmd);
        assert!(!redacted.contains("deadbeef"));
        assert!(redacted.contains("K3S_TOKEN=<redacted>"));
        assert!(redacted.contains("INSTALL_K3S_VERSION='v1.29.4+k3s1'"));
        assert!(redacted.contains("K3S_URL='https://a:6443'"));
    }
}
