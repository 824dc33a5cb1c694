//! Host-side configuration for talking to plugins.
//!
//! Values come from a JSON settings file, from `KROK_PLUGIN_*` environment
//! variables, or from defaults, with CLI flags applied on top by the binary.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::PluginError;

/// Settings as written in a JSON file, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// How long to wait for the plugin's `ready` message.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_seconds: u64,

    /// Deadline for a single `Execute` call. Absent means no deadline.
    #[serde(default)]
    pub call_timeout_seconds: Option<u64>,

    /// How long a plugin gets to exit after `shutdown` before it is killed.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

/// Parsed client configuration with `Duration` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ready_timeout: Duration,
    pub call_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(default_ready_timeout()),
            call_timeout: None,
            shutdown_timeout: Duration::from_secs(default_shutdown_timeout()),
        }
    }
}

impl From<ClientSettings> for ClientConfig {
    fn from(settings: ClientSettings) -> Self {
        Self {
            ready_timeout: Duration::from_secs(settings.ready_timeout_seconds),
            call_timeout: settings.call_timeout_seconds.map(Duration::from_secs),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_seconds),
        }
    }
}

impl ClientConfig {
    /// Parse a JSON settings document.
    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        let settings: ClientSettings = serde_json::from_str(json)?;
        Ok(settings.into())
    }

    /// Create from environment variables, falling back to defaults.
    ///
    /// Reads `KROK_PLUGIN_READY_TIMEOUT`, `KROK_PLUGIN_CALL_TIMEOUT` and
    /// `KROK_PLUGIN_SHUTDOWN_TIMEOUT` (in seconds).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let seconds = |key: &str| {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(Duration::from_secs(v)),
                Err(e) => {
                    warn!(key, value = %raw, error = %e, "Ignoring invalid timeout");
                    None
                }
            }
        };

        let defaults = Self::default();
        Self {
            ready_timeout: seconds("KROK_PLUGIN_READY_TIMEOUT").unwrap_or(defaults.ready_timeout),
            call_timeout: seconds("KROK_PLUGIN_CALL_TIMEOUT").or(defaults.call_timeout),
            shutdown_timeout: seconds("KROK_PLUGIN_SHUTDOWN_TIMEOUT")
                .unwrap_or(defaults.shutdown_timeout),
        }
    }
}

const fn default_ready_timeout() -> u64 {
    30
}

const fn default_shutdown_timeout() -> u64 {
    5
}
