//! Start command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;

/// Start a DKV node.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override the RPC bind address.
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Override the storage directory.
    #[arg(long)]
    pub db_folder: Option<String>,

    /// Override the discovery endpoints (comma-separated).
    #[arg(long)]
    pub discovery_endpoints: Option<String>,
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run the start command.
pub async fn run_start(
    args: StartArgs,
    config_path: &Path,
    log_level: Option<String>,
) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let overrides = ConfigOverrides {
        listen_addr: args.listen_addr,
        db_folder: args.db_folder,
        log_level,
        discovery_endpoints: args
            .discovery_endpoints
            .map(|s| s.split(',').map(|e| e.trim().to_string()).collect()),
    };
    config.apply_overrides(&overrides);
    config.validate()?;

    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
