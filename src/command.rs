//! The command capability transported between host and plugin.
//!
//! A command takes an opaque string and answers with an outcome string, a
//! success verdict and, possibly, an error. The three travel together in
//! [`Execution`]: an implementation may report an error and still hand back
//! a meaningful outcome, and the server stub forwards both.

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::CommandClient;
use crate::error::PluginError;

/// Result of one `execute` call.
///
/// `success == false` is a business-level verdict; `error` means the call
/// itself failed (or the implementation reported a failure). Both may be set.
#[derive(Debug)]
pub struct Execution {
    pub outcome: String,
    pub success: bool,
    pub error: Option<PluginError>,
}

impl Execution {
    /// A call that completed without error.
    pub fn completed(outcome: impl Into<String>, success: bool) -> Self {
        Self {
            outcome: outcome.into(),
            success,
            error: None,
        }
    }

    /// A call that failed with nothing to report besides the error.
    pub fn failed(error: PluginError) -> Self {
        Self {
            outcome: String::new(),
            success: false,
            error: Some(error),
        }
    }

    /// Attach an error while keeping outcome and success as they are.
    #[must_use]
    pub fn with_error(mut self, error: PluginError) -> Self {
        self.error = Some(error);
        self
    }

    /// Collapse into a `Result`, dropping the body if an error is present.
    pub fn into_result(self) -> Result<(String, bool), PluginError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok((self.outcome, self.success)),
        }
    }
}

/// Handles data passed down from the hook server.
///
/// Implementations must be safe to call concurrently; nothing above them
/// serializes calls.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, raw: &str) -> Execution;
}

#[async_trait]
impl<C: Command + ?Sized> Command for Arc<C> {
    async fn execute(&self, raw: &str) -> Execution {
        (**self).execute(raw).await
    }
}

/// A command that is either in-process or behind a plugin connection.
///
/// The local type defaults to a shared trait object, so code that only
/// holds remote commands can name `CommandHandle` without picking one.
pub enum CommandHandle<C = Arc<dyn Command>> {
    /// Business logic lives in this process.
    Local(C),
    /// Business logic lives in a plugin, reached through the client stub.
    Remote(CommandClient),
}

impl CommandHandle {
    /// A command served by a plugin.
    pub const fn remote(client: CommandClient) -> Self {
        Self::Remote(client)
    }

    /// An in-process command behind the default trait object.
    pub fn local(command: impl Command + 'static) -> Self {
        Self::Local(Arc::new(command))
    }
}

impl<C> CommandHandle<C> {
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

#[async_trait]
impl<C: Command> Command for CommandHandle<C> {
    async fn execute(&self, raw: &str) -> Execution {
        match self {
            Self::Local(command) => command.execute(raw).await,
            Self::Remote(client) => client.execute(raw).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Command for Upper {
        async fn execute(&self, raw: &str) -> Execution {
            Execution::completed(raw.to_uppercase(), true)
        }
    }

    #[test]
    fn with_error_keeps_body() {
        let exec = Execution::completed("half done", false)
            .with_error(PluginError::application("disk full"));
        assert_eq!(exec.outcome, "half done");
        assert!(!exec.success);
        assert_eq!(exec.error.unwrap().to_string(), "disk full");
    }

    #[test]
    fn failed_is_empty_and_unsuccessful() {
        let exec = Execution::failed(PluginError::Closed);
        assert_eq!(exec.outcome, "");
        assert!(!exec.success);
        assert!(exec.into_result().is_err());
    }

    #[test]
    fn into_result_ok() {
        let (outcome, success) = Execution::completed("deployed", true).into_result().unwrap();
        assert_eq!(outcome, "deployed");
        assert!(success);
    }

    #[tokio::test]
    async fn local_handle_dispatches_in_process() {
        let handle = CommandHandle::Local(Upper);
        assert!(!handle.is_remote());
        let exec = handle.execute("deploy").await;
        assert_eq!(exec.outcome, "DEPLOY");
        assert!(exec.error.is_none());
    }

    #[tokio::test]
    async fn shared_trait_object_is_a_command() {
        let shared: Arc<dyn Command> = Arc::new(Upper);
        let handle = CommandHandle::Local(shared);
        assert_eq!(handle.execute("v2").await.outcome, "V2");
    }

    #[tokio::test]
    async fn default_handles_mix_in_one_collection() {
        let handles: Vec<CommandHandle> = vec![CommandHandle::local(Upper)];
        assert!(!handles[0].is_remote());
        assert_eq!(handles[0].execute("ship").await.outcome, "SHIP");
    }
}
