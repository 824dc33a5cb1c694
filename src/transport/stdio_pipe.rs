//! Stdin/stdout pipe transport for plugin processes.
//!
//! Owns a child process, communicates via length-prefixed JSON on
//! the child's stdin (requests) and stdout (responses).
//! The child's stderr is forwarded to the host log.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::protocol::{ExecuteReply, ExecuteRequest};
use super::Transport;
use crate::config::ClientConfig;
use crate::error::PluginError;
use crate::handshake::HandshakeConfig;

/// Transport that talks to a plugin process via stdin/stdout pipes.
///
/// The plugin is spawned once and kept alive until `shutdown()` or drop.
/// Calls are multiplexed over the pipes, so concurrent callers do not block
/// each other.
pub struct StdioPipeTransport {
    child: Mutex<Child>,
    connection: Connection,
    shutdown_timeout: Duration,
}

impl StdioPipeTransport {
    /// Launch a plugin and wait for its `ready` message.
    ///
    /// The magic cookie from `handshake` is placed in the child's
    /// environment; the announced protocol version must match.
    pub async fn spawn(
        program: &Path,
        args: &[String],
        handshake: HandshakeConfig,
        config: &ClientConfig,
    ) -> Result<Self, PluginError> {
        debug!(program = %program.display(), "Spawning plugin process");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .env(handshake.magic_cookie_key, handshake.magic_cookie_value)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PluginError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(PluginError::Closed)?;
        let stdout = child.stdout.take().ok_or(PluginError::Closed)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(program.display().to_string(), stderr));
        }

        let connection =
            match Connection::establish(stdout, stdin, handshake, config.ready_timeout).await {
                Ok(connection) => connection,
                Err(e) => {
                    let _ = child.kill().await;
                    return Err(e);
                }
            };

        info!(program = %program.display(), pid = ?child.id(), "Plugin started");

        Ok(Self {
            child: Mutex::new(child),
            connection,
            shutdown_timeout: config.shutdown_timeout,
        })
    }
}

#[async_trait]
impl Transport for StdioPipeTransport {
    async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteReply, PluginError> {
        self.connection.execute(req).await
    }

    async fn ping(&self) -> Result<(), PluginError> {
        self.connection.ping().await
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if let Err(e) = self.connection.shutdown().await {
            warn!(error = %e, "Graceful shutdown request failed");
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "Plugin exited");
            }
            Err(_) => {
                warn!(timeout = ?self.shutdown_timeout, "Plugin did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }
}

/// Relay plugin stderr lines into the host log.
async fn forward_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(plugin = %program, "{line}"),
            Ok(None) => break,
            Err(e) => {
                warn!(plugin = %program, error = %e, "Failed to read plugin stderr");
                break;
            }
        }
    }
}
