//! krok-command
//!
//! Host-side runner: launches a command plugin, performs the handshake and
//! calls `Execute` once per raw payload given on the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use krok_command_plugin::{ClientConfig, Command, CommandClient, HANDSHAKE};

#[derive(Parser, Debug)]
#[command(name = "krok-command")]
#[command(about = "Run payloads through a krok command plugin")]
struct Args {
    /// Path to the plugin executable
    #[arg(long)]
    plugin: PathBuf,

    /// Extra argument passed to the plugin (repeatable)
    #[arg(long = "plugin-arg")]
    plugin_args: Vec<String>,

    /// JSON settings file (timeouts in seconds)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-call deadline in seconds
    #[arg(long)]
    call_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Raw payloads to execute, in order
    #[arg(required = true)]
    raw: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout carries only outcomes)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            ClientConfig::from_json(&json).context("Failed to parse config")?
        }
        None => ClientConfig::from_env(),
    };
    if let Some(secs) = args.call_timeout {
        config.call_timeout = Some(Duration::from_secs(secs));
    }

    let client = CommandClient::launch(&args.plugin, &args.plugin_args, HANDSHAKE, &config)
        .await
        .with_context(|| format!("Failed to start plugin {}", args.plugin.display()))?;

    let mut failures = 0usize;
    for raw in &args.raw {
        let exec = client.execute(raw).await;
        match &exec.error {
            None => {
                info!(success = exec.success, "Command completed");
                println!("{}\t{}", if exec.success { "ok" } else { "fail" }, exec.outcome);
                if !exec.success {
                    failures += 1;
                }
            }
            Some(e) => {
                warn!(error = %e, transport = e.is_transport(), "Command failed");
                println!("error\t{e}");
                failures += 1;
            }
        }
    }

    if let Err(e) = client.shutdown().await {
        warn!(error = %e, "Plugin shutdown failed");
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} payloads did not succeed", args.raw.len());
    }
    Ok(())
}
