//! DKV - unified CLI entrypoint.
//!
//! Usage:
//!   dkv start --config config/dkv.toml
//!   dkv status [--endpoint ADDR]
//!   dkv config validate <path>
//!   dkv cluster list-nodes [--endpoint ADDR]
//!   dkv backup <path> [--endpoint ADDR]
//!   dkv restore <path> [--endpoint ADDR]

use anyhow::Result;
use clap::Parser;
use dkv::cli::commands::{
    run_backup, run_cluster, run_config, run_restore, run_start, run_status,
};
use dkv::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Global --config or the conventional default location.
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/dkv.toml"));

    match cli.command {
        Commands::Start(args) => run_start(args, &config_path, cli.log_level).await,
        Commands::Status(args) => run_status(args).await,
        Commands::Config(args) => run_config(args),
        Commands::Cluster(args) => run_cluster(args).await,
        Commands::Backup(args) => run_backup(args).await,
        Commands::Restore(args) => run_restore(args).await,
    }
}
