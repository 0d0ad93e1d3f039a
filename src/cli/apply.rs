//! Apply a delta archive onto a base release

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::applier::DeltaApplier;
use crate::config::Config;

pub fn run(
    base: &Path,
    delta: &Path,
    output: &Path,
    no_progress: bool,
    config: &Config,
) -> Result<()> {
    println!(
        "{} {} + {}",
        "Applying delta:".cyan().bold(),
        base.file_name().unwrap_or_default().to_string_lossy(),
        delta.file_name().unwrap_or_default().to_string_lossy()
    );

    let progress_bar = if no_progress {
        None
    } else {
        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}% {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    };

    let callback = progress_bar.clone().map(|pb| {
        Box::new(move |percent: u8| pb.set_position(percent as u64)) as Box<dyn FnMut(u8)>
    });

    let applier = DeltaApplier::new(base, delta)?
        .with_scratch_root(config.paths.scratch_dir.clone());
    let result = applier.apply(output, callback);

    if let Some(pb) = progress_bar {
        if result.is_ok() {
            pb.finish_with_message("done");
        } else {
            pb.abandon_with_message("failed");
        }
    }
    result?;

    let new_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);

    println!();
    println!("{}", "Delta applied successfully!".green().bold());
    println!();
    println!("  {}: {}", "Output".cyan(), output.display());
    println!("  {}: {}", "Archive size".cyan(), super::format_size(new_size));

    Ok(())
}
