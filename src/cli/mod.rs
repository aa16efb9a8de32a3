//! Command-line interface.
//!
//! Unified CLI for DKV operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// DKV - distributed key-value store node and operator tooling.
#[derive(Parser, Debug)]
#[command(name = "dkv")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a DKV node with the configured role.
    Start(commands::StartArgs),
    /// Show a node's region status.
    Status(commands::StatusArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Cluster membership operations.
    Cluster(commands::ClusterArgs),
    /// Write a snapshot of a node's keyspace.
    Backup(commands::BackupArgs),
    /// Replace a node's keyspace from a snapshot.
    Restore(commands::RestoreArgs),
}
