//! updelta - delta update engine for application release archives
//!
//! Builds compact delta archives between two releases of an application and
//! reconstructs full release archives from a base plus a delta.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod applier;
mod archive;
mod builder;
mod cli;
mod config;
mod error;
mod layout;
mod patch;
mod progress;
mod release;
mod version;

use cli::Commands;

// Re-export error types for library users
pub use error::{Result as UpdeltaResult, UpdeltaError};

/// Delta update engine for application release archives
#[derive(Parser)]
#[command(name = "updelta")]
#[command(version)]
#[command(about = "Delta update engine for application release archives", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_target(false)
        .init();

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;

    // Execute command
    cli::execute(cli.command, &config)
}
