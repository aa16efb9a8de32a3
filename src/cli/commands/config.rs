//! Config command implementation.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::core::config::Config;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Parse and validate a configuration file.
    Validate {
        /// Path to the configuration file.
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Print the effective configuration after defaults.
    Show {
        /// Path to the configuration file.
        #[arg(required = true)]
        path: PathBuf,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { path } => validate(&path),
        ConfigCommand::Show { path } => show(&path),
    }
}

fn validate(path: &Path) -> Result<()> {
    Config::from_file(path)
        .with_context(|| format!("validation failed for {}", path.display()))?;
    println!("{}: OK", path.display());
    Ok(())
}

fn show(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
    println!("{}", rendered);
    Ok(())
}
