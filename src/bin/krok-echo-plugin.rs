//! krok-echo-plugin
//!
//! Reference command plugin. Launched by a host, never by hand.
//!
//! - `deploy:<version>` answers `deployed`
//! - `bad` fails with `invalid payload`
//! - anything else is echoed back

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use krok_command_plugin::{serve, Command, Execution, PluginError, HANDSHAKE};

struct Echo;

#[async_trait]
impl Command for Echo {
    async fn execute(&self, raw: &str) -> Execution {
        debug!(raw, "Executing");
        if raw.starts_with("deploy:") {
            Execution::completed("deployed", true)
        } else if raw == "bad" {
            Execution::completed("", false).with_error(PluginError::application("invalid payload"))
        } else {
            Execution::completed(raw, true)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is the protocol channel; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    serve(Echo, HANDSHAKE).await?;
    Ok(())
}
