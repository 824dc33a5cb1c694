//! Plugin protocol message types.
//!
//! Length-prefixed JSON protocol for host ↔ plugin communication.
//! Messages are framed as: [4-byte BE length][JSON payload]

use serde::{Deserialize, Serialize};

/// Arguments of a single `Execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub raw: String,
}

/// Payload of a completed `Execute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub outcome: String,
    pub success: bool,
}

/// What the server stub sends back for one call.
///
/// The response body is always present, even when `error` is set: it holds
/// whatever the implementation returned alongside its error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteReply {
    pub response: ExecuteResponse,
    pub error: Option<String>,
}

/// Request sent from host to plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Run the command with the given raw payload.
    Execute { id: u64, raw: String },
    /// Health check.
    Ping { id: u64 },
    /// Graceful shutdown.
    Shutdown,
}

/// Response sent from plugin to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginMessage {
    /// Plugin is ready to accept requests (sent on startup).
    Ready { protocol_version: u32 },
    /// Execution result.
    Result {
        id: u64,
        outcome: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    /// Pong response to health check.
    Pong { id: u64 },
    /// Protocol-level failure, tied to a request when the id is known.
    Error {
        #[serde(default)]
        id: Option<u64>,
        message: String,
    },
}

impl PluginMessage {
    /// Wrap a server stub reply for the wire.
    pub fn result(id: u64, reply: ExecuteReply) -> Self {
        Self::Result {
            id,
            outcome: reply.response.outcome,
            success: reply.response.success,
            error: reply.error,
        }
    }

    /// Id of the call this message answers, if any.
    pub const fn id(&self) -> Option<u64> {
        match self {
            Self::Result { id, .. } | Self::Pong { id } => Some(*id),
            Self::Error { id, .. } => *id,
            Self::Ready { .. } => None,
        }
    }
}
