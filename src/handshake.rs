//! Handshake shared by host and plugin.
//!
//! The host passes the magic cookie to the plugin through its environment;
//! the plugin answers with a `ready` frame carrying its protocol version.
//! Both checks must pass before any command traffic flows.

use crate::error::PluginError;

/// Static compatibility token exchanged before a plugin connection is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Bumped only on breaking wire changes.
    pub protocol_version: u32,
    /// Name of the environment variable carrying the cookie.
    pub magic_cookie_key: &'static str,
    /// Value the cookie must match exactly.
    pub magic_cookie_value: &'static str,
}

/// Handshake for krok command plugins.
///
/// Never change these values: every previously built plugin and host
/// depends on them.
pub const HANDSHAKE: HandshakeConfig = HandshakeConfig {
    protocol_version: 1,
    magic_cookie_key: "KROK_COMMANDS",
    magic_cookie_value: "26e39f04-4f5b-48e7-9c54-56b6e1f0c7cc",
};

impl Default for HandshakeConfig {
    fn default() -> Self {
        HANDSHAKE
    }
}

impl HandshakeConfig {
    /// Check a cookie value as seen by the plugin.
    pub fn verify_cookie(&self, value: Option<&str>) -> Result<(), PluginError> {
        match value {
            Some(v) if v == self.magic_cookie_value => Ok(()),
            Some(_) => Err(PluginError::Handshake(format!(
                "magic cookie {} does not match",
                self.magic_cookie_key
            ))),
            None => Err(PluginError::Handshake(format!(
                "this binary is a plugin and is not meant to be executed directly; \
                 run it through a host that sets {}",
                self.magic_cookie_key
            ))),
        }
    }

    /// Check the cookie in the current process environment.
    pub fn verify_env(&self) -> Result<(), PluginError> {
        let value = std::env::var(self.magic_cookie_key).ok();
        self.verify_cookie(value.as_deref())
    }

    /// Check the protocol version announced by a plugin.
    pub fn verify_version(&self, announced: u32) -> Result<(), PluginError> {
        if announced == self.protocol_version {
            Ok(())
        } else {
            Err(PluginError::Handshake(format!(
                "incompatible plugin protocol version: expected {}, got {announced}",
                self.protocol_version
            )))
        }
    }
}
