//! Client stub: a [`Command`] whose logic runs in a plugin.
//!
//! Every failure of the remote call collapses to an empty outcome, `false`
//! and the error. No retries, no caching.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::command::{Command, Execution};
use crate::config::ClientConfig;
use crate::error::PluginError;
use crate::handshake::HandshakeConfig;
use crate::transport::{ExecuteReply, ExecuteRequest, StdioPipeTransport, Transport};

/// Implementation of [`Command`] that talks to a plugin over a [`Transport`].
#[derive(Clone)]
pub struct CommandClient {
    transport: Arc<dyn Transport>,
    call_timeout: Option<Duration>,
}

impl CommandClient {
    /// Wrap an established transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            call_timeout: None,
        }
    }

    /// Fail calls that take longer than `timeout`.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Launch a plugin executable and connect to it.
    pub async fn launch(
        program: &Path,
        args: &[String],
        handshake: HandshakeConfig,
        config: &ClientConfig,
    ) -> Result<Self, PluginError> {
        let transport = StdioPipeTransport::spawn(program, args, handshake, config).await?;
        Ok(Self::new(Arc::new(transport)).with_call_timeout(config.call_timeout))
    }

    /// Health check against the plugin.
    pub async fn ping(&self) -> Result<(), PluginError> {
        self.transport.ping().await
    }

    /// Stop the plugin.
    pub async fn shutdown(&self) -> Result<(), PluginError> {
        self.transport.shutdown().await
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    async fn call(&self, req: ExecuteRequest) -> Result<ExecuteReply, PluginError> {
        let call = self.transport.execute(req);
        match self.call_timeout {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .unwrap_or(Err(PluginError::DeadlineExceeded(deadline))),
            None => call.await,
        }
    }
}

#[async_trait]
impl Command for CommandClient {
    #[instrument(skip(self, raw), fields(raw_len = raw.len()))]
    async fn execute(&self, raw: &str) -> Execution {
        let req = ExecuteRequest {
            raw: raw.to_string(),
        };

        match self.call(req).await {
            Ok(ExecuteReply {
                response,
                error: None,
            }) => {
                debug!(success = response.success, "Remote execute completed");
                Execution::completed(response.outcome, response.success)
            }
            Ok(ExecuteReply {
                error: Some(message),
                ..
            }) => {
                debug!(error = %message, "Remote command returned an error");
                Execution::failed(PluginError::Application(message))
            }
            Err(e) => {
                warn!(error = %e, "Remote execute failed");
                Execution::failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandHandle;
    use crate::transport::ExecuteResponse;

    /// Transport answering from a fixed script.
    struct MockTransport {
        reply: fn(&str) -> Result<ExecuteReply, PluginError>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteReply, PluginError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.reply)(&req.raw)
        }

        async fn ping(&self) -> Result<(), PluginError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), PluginError> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    fn client(reply: fn(&str) -> Result<ExecuteReply, PluginError>) -> CommandClient {
        CommandClient::new(Arc::new(MockTransport { reply, delay: None }))
    }

    fn reply(outcome: &str, success: bool, error: Option<&str>) -> ExecuteReply {
        ExecuteReply {
            response: ExecuteResponse {
                outcome: outcome.to_string(),
                success,
            },
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn passes_response_through() {
        let client = client(|raw| {
            assert_eq!(raw, "deploy:v1");
            Ok(reply("deployed", true, None))
        });

        let exec = client.execute("deploy:v1").await;
        assert_eq!(exec.outcome, "deployed");
        assert!(exec.success);
        assert!(exec.error.is_none());
    }

    #[tokio::test]
    async fn negative_verdict_is_not_an_error() {
        let client = client(|_| Ok(reply("nothing to do", false, None)));

        let exec = client.execute("noop").await;
        assert_eq!(exec.outcome, "nothing to do");
        assert!(!exec.success);
        assert!(exec.error.is_none());
    }

    #[tokio::test]
    async fn application_error_discards_body() {
        let client = client(|_| Ok(reply("partial", true, Some("invalid payload"))));

        let exec = client.execute("bad").await;
        assert_eq!(exec.outcome, "");
        assert!(!exec.success);
        let err = exec.error.unwrap();
        assert!(!err.is_transport());
        assert_eq!(err.to_string(), "invalid payload");
    }

    #[tokio::test]
    async fn transport_error_collapses() {
        let client = client(|_| Err(PluginError::Closed));

        let exec = client.execute("deploy:v2").await;
        assert_eq!(exec.outcome, "");
        assert!(!exec.success);
        assert!(exec.error.unwrap().is_transport());
    }

    #[tokio::test]
    async fn deadline_exceeded_is_transport_error() {
        let client = CommandClient::new(Arc::new(MockTransport {
            reply: |_| Ok(reply("late", true, None)),
            delay: Some(Duration::from_secs(5)),
        }))
        .with_call_timeout(Some(Duration::from_millis(20)));

        let exec = client.execute("slow").await;
        assert_eq!(exec.outcome, "");
        assert!(matches!(exec.error, Some(PluginError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn remote_handle_goes_through_stub() {
        let handle = CommandHandle::remote(client(|raw| Ok(reply(raw, true, None))));
        assert!(handle.is_remote());

        let exec = handle.execute("echo").await;
        assert_eq!(exec.outcome, "echo");
        assert!(exec.success);
    }
}
