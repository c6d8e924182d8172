//! ota-agent - simulated device running the OTA update agent

#![deny(clippy::unwrap_used)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ota_agent::logging::{LoggingConfig, init_logging};
use ota_agent::{AgentOptions, run};
use ota_core::OtaConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "ota-agent")]
#[command(about = "Check for, download and activate firmware updates")]
#[command(version)]
struct Cli {
    /// Configuration file; created with defaults if missing
    #[arg(short, long, default_value = "ota.json")]
    config: PathBuf,

    /// Directory holding the slot files
    #[arg(short, long, default_value = "ota-data")]
    data_dir: PathBuf,

    /// Image to install into the active slot when it is empty
    #[arg(long)]
    factory_image: Option<PathBuf>,

    /// Exit after one boot cycle
    #[arg(long)]
    once: bool,

    /// Seconds to wait for the update host to become reachable
    #[arg(long, default_value_t = 30)]
    network_timeout: u64,

    /// Seconds the application runs before restarting to check again
    #[arg(long, default_value_t = 10)]
    recheck_interval: u64,

    /// Stop after this many boots
    #[arg(long)]
    max_boots: Option<u32>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig::from_verbosity(cli.verbose, cli.json))?;

    let config = OtaConfig::load_from_path(&cli.config)
        .await
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    let mut options = AgentOptions::new(config, cli.data_dir);
    options.factory_image = cli.factory_image;
    options.once = cli.once;
    options.network_timeout = Duration::from_secs(cli.network_timeout);
    options.recheck_interval = Duration::from_secs(cli.recheck_interval);
    options.max_boots = cli.max_boots;

    let summary = run(options).await?;
    info!(
        boots = summary.boots,
        status = ?summary.last_status,
        slot = %summary.active_slot,
        version = summary.running.as_ref().map(|d| d.version()),
        "Agent stopped"
    );
    Ok(())
}
