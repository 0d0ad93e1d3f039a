//! Command-line interface for updelta

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

mod apply;
mod build;
mod compare;
mod info;

#[derive(Subcommand)]
pub enum Commands {
    /// Build a delta archive between two releases
    Build {
        /// Base (older) release archive
        base: std::path::PathBuf,

        /// New release archive
        new: std::path::PathBuf,

        /// Path of the delta archive to create
        output: std::path::PathBuf,

        /// Override the number of diff workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Apply a delta archive onto a base release
    Apply {
        /// Base (older) release archive
        base: std::path::PathBuf,

        /// Delta archive to apply
        delta: std::path::PathBuf,

        /// Path of the reconstructed release archive
        output: std::path::PathBuf,

        /// Don't draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show what a delta archive contains
    Info {
        /// Delta archive to inspect
        delta: std::path::PathBuf,

        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare two release version strings
    Compare {
        /// First version
        a: String,

        /// Second version
        b: String,
    },
}

/// Execute a CLI command
pub fn execute(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Build { base, new, output, workers } => {
            build::run(&base, &new, &output, workers, config)
        }
        Commands::Apply { base, delta, output, no_progress } => {
            apply::run(&base, &delta, &output, no_progress, config)
        }
        Commands::Info { delta, json } => info::run(&delta, json),
        Commands::Compare { a, b } => compare::run(&a, &b),
    }
}

/// Format file size as human-readable string
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
