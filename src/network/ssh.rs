// file: src/network/ssh.rs
// version: 2.0.1
// guid: t0u1v2w3-x4y5-6789-0123-456789tuvwxy

//! SSH executor for the script-driven cluster flavor

use super::executor::{redact_command, ExecResult, RemoteExecutor, RemoteSession};
use crate::config::NodeAuth;
use crate::error::{ExecError, ExecErrorKind};
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, error, info};

/// libssh2 LIBSSH2_ERROR_TIMEOUT
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Opens password, key, or agent authenticated SSH sessions
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
}

impl SshExecutor {
    /// Create a new SSH executor
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        auth: &NodeAuth,
    ) -> ExecResult<Box<dyn RemoteSession>> {
        info!("Connecting to {}:{} as {}", host, port, auth.username());

        let target = host.to_string();
        let auth = auth.clone();
        let timeout = self.connect_timeout;
        let session = tokio::task::spawn_blocking(move || {
            connect_blocking(&target, port, &auth, timeout)
        })
        .await
        .map_err(|e| {
            ExecError::new(
                ExecErrorKind::Disconnected,
                "connect",
                format!("connect task failed: {}", e),
            )
        })??;

        info!("SSH connection established to {}", host);
        Ok(Box::new(SshSession {
            session: Some(session),
            host: host.to_string(),
        }))
    }
}

/// libssh2 takes a `u32` millisecond timeout; longer durations saturate
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn connect_blocking(
    host: &str,
    port: u16,
    auth: &NodeAuth,
    timeout: Duration,
) -> ExecResult<Session> {
    let command = format!("ssh {}@{}:{}", auth.username(), host, port);
    let connect_err = |kind, msg: String| ExecError::new(kind, command.clone(), msg);

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| connect_err(ExecErrorKind::Unreachable, format!("Failed to resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| connect_err(ExecErrorKind::Unreachable, format!("No address for {}", host)))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        let kind = match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ExecErrorKind::TimedOut,
            _ => ExecErrorKind::Unreachable,
        };
        connect_err(kind, format!("Failed to connect to {}: {}", host, e))
    })?;

    let mut session = Session::new().map_err(|e| {
        connect_err(ExecErrorKind::Unreachable, format!("Failed to create SSH session: {}", e))
    })?;
    session.set_timeout(timeout_millis(timeout));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| connect_err(classify_ssh(&e, ExecErrorKind::Unreachable), format!("SSH handshake failed: {}", e)))?;

    let username = auth.username();
    let outcome = match auth {
        NodeAuth::Password { password, .. } => session.userauth_password(username, password),
        NodeAuth::Key {
            private_key_path,
            passphrase,
            ..
        } => session.userauth_pubkey_file(
            username,
            None,
            private_key_path,
            passphrase.as_deref(),
        ),
        NodeAuth::Agent { .. } | NodeAuth::None => session.userauth_agent(username),
    };

    if let Err(e) = outcome {
        return Err(connect_err(ExecErrorKind::AuthFailed, format!("SSH authentication failed: {}", e)));
    }
    if !session.authenticated() {
        return Err(connect_err(ExecErrorKind::AuthFailed, "SSH authentication failed".to_string()));
    }

    // Commands such as installers may legitimately run for minutes.
    session.set_timeout(0);
    Ok(session)
}

fn classify_ssh(e: &ssh2::Error, fallback: ExecErrorKind) -> ExecErrorKind {
    match e.code() {
        ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => ExecErrorKind::TimedOut,
        _ => fallback,
    }
}

/// An authenticated SSH session to one node
pub struct SshSession {
    session: Option<Session>,
    host: String,
}

#[async_trait::async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&mut self, command: &str) -> ExecResult<String> {
        let shown = redact_command(command);
        debug!("Executing on {}: {}", self.host, shown);

        let session = self.session.clone().ok_or_else(|| {
            ExecError::new(ExecErrorKind::Disconnected, shown.clone(), "No active SSH session")
        })?;

        let cmd = command.to_string();
        let display = shown.clone();
        let result = tokio::task::spawn_blocking(move || run_blocking(&session, &cmd, &display))
            .await
            .map_err(|e| {
                ExecError::new(
                    ExecErrorKind::Disconnected,
                    shown.clone(),
                    format!("command task failed: {}", e),
                )
            })?;

        if let Err(e) = &result {
            error!("Command on {} failed: {}", self.host, e);
        }
        result
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "", None);
            info!("SSH session to {} disconnected", self.host);
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "", None);
        }
    }
}

fn run_blocking(session: &Session, command: &str, display: &str) -> ExecResult<String> {
    let dropped = |e: &dyn std::fmt::Display, output: &str| {
        ExecError::new(
            ExecErrorKind::Disconnected,
            display,
            format!("{}{}", output, e),
        )
    };

    let mut channel = session
        .channel_session()
        .map_err(|e| ExecError::new(classify_ssh(&e, ExecErrorKind::Disconnected), display, e.to_string()))?;

    channel
        .exec(command)
        .map_err(|e| ExecError::new(classify_ssh(&e, ExecErrorKind::Disconnected), display, e.to_string()))?;

    let mut stdout = String::new();
    let mut stderr = String::new();

    channel
        .read_to_string(&mut stdout)
        .map_err(|e| dropped(&e, &stdout))?;
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| dropped(&e, &stdout))?;
    channel.wait_close().map_err(|e| dropped(&e, &stdout))?;

    let exit_status = channel.exit_status().map_err(|e| dropped(&e, &stdout))?;

    let mut combined = stdout;
    if !stderr.trim().is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }

    if exit_status != 0 {
        return Err(ExecError::new(
            ExecErrorKind::Exited(exit_status),
            display,
            combined,
        ));
    }

    debug!("Command executed successfully: {} bytes", combined.len());
    Ok(combined)
}
