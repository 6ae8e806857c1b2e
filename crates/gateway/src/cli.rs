//! Command-line interface.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use prg_domain::config::Config;

pub const DEFAULT_CONFIG_PATH: &str = "./resgate.toml";

#[derive(Debug, Parser)]
#[command(name = "resgate", about = "Personal resource gateway", version)]
pub struct Cli {
    /// Path to the TOML config file (default `./resgate.toml`, also
    /// settable via `RESGATE_CONFIG`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway (default when no subcommand is given).
    Serve,
    /// Print a fresh 32-byte hex vault master key and exit.
    Keygen,
    /// Config helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Check the config file for problems.
    Validate,
    /// Print the effective config (defaults applied).
    Show,
}

/// Load the config file, falling back to built-in defaults when none
/// exists. Returns the config and the path it came from (for messages).
pub fn load_config(cli_path: Option<&PathBuf>) -> anyhow::Result<(Config, String)> {
    let path = cli_path
        .cloned()
        .or_else(|| std::env::var("RESGATE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok((Config::default(), format!("{} (defaults)", path.display())));
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok((config, path.display().to_string()))
}
