//! Backup and restore command implementations.

use anyhow::Result;
use clap::Args;

use crate::rpc::client::MaintenanceClient;

/// Write a snapshot of a node's keyspace.
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Destination path on the node's filesystem.
    #[arg(required = true)]
    pub path: String,

    /// Node RPC address.
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    pub endpoint: String,
}

/// Replace a node's keyspace from a snapshot.
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Snapshot path on the node's filesystem.
    #[arg(required = true)]
    pub path: String,

    /// Node RPC address.
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    pub endpoint: String,
}

/// Run the backup command.
pub async fn run_backup(args: BackupArgs) -> Result<()> {
    let client = MaintenanceClient::connect(&args.endpoint)?;
    client.backup(&args.path).await?;
    println!("backup written to {}", args.path);
    Ok(())
}

/// Run the restore command.
pub async fn run_restore(args: RestoreArgs) -> Result<()> {
    let client = MaintenanceClient::connect(&args.endpoint)?;
    client.restore(&args.path).await?;
    println!("keyspace restored from {}", args.path);
    Ok(())
}
