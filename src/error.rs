//! Error type surfaced at the plugin API boundary.
//!
//! Transport failures and application failures both arrive as a single
//! [`PluginError`]; [`PluginError::is_transport`] tells them apart when a
//! caller cares.

use std::time::Duration;

/// Errors produced by the command plugin layer.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// I/O failure on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The plugin process could not be started.
    #[error("failed to spawn plugin {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A frame exceeded the maximum allowed size.
    #[error("message exceeds max size: {size} > {max}")]
    FrameTooLarge { size: usize, max: u32 },

    /// Host and plugin disagree on the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection to the plugin is gone.
    #[error("plugin connection closed")]
    Closed,

    /// The call did not complete before its deadline.
    #[error("call deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The remote side reported a protocol-level failure.
    #[error("remote protocol error: {0}")]
    Remote(String),

    /// The command implementation returned an error.
    #[error("{0}")]
    Application(String),
}

impl PluginError {
    /// Build an application error from any displayable message.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    /// Whether the call itself could not be completed.
    ///
    /// Everything except [`PluginError::Application`] is a transport failure.
    pub const fn is_transport(&self) -> bool {
        !matches!(self, Self::Application(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_error_displays_message_verbatim() {
        let err = PluginError::application("invalid payload");
        assert_eq!(err.to_string(), "invalid payload");
        assert!(!err.is_transport());
    }

    #[test]
    fn closed_is_transport() {
        assert!(PluginError::Closed.is_transport());
        assert!(PluginError::DeadlineExceeded(Duration::from_secs(1)).is_transport());
    }
}
