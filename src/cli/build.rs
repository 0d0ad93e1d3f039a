//! Build a delta archive between two release archives

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::builder::DeltaBuilder;
use crate::config::Config;

pub fn run(
    base: &Path,
    new: &Path,
    output: &Path,
    workers: Option<usize>,
    config: &Config,
) -> Result<()> {
    println!(
        "{} {} -> {}",
        "Building delta:".cyan().bold(),
        base.file_name().unwrap_or_default().to_string_lossy(),
        new.file_name().unwrap_or_default().to_string_lossy()
    );

    let mut config = config.clone();
    if let Some(workers) = workers {
        config.build.workers = workers;
    }

    let builder = DeltaBuilder::new(base, new)?.with_config(&config);
    println!(
        "  {} {} {} -> {}",
        "→".cyan(),
        builder.new_manifest().name.bold(),
        builder.base_manifest().version,
        builder.new_manifest().version
    );

    let stats = builder.build(output)?;

    let delta_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    let new_size = std::fs::metadata(new).map(|m| m.len()).unwrap_or(0);
    let savings = if new_size > 0 {
        100.0 - (delta_size as f64 / new_size as f64 * 100.0)
    } else {
        0.0
    };

    println!();
    println!("{}", "Delta archive created successfully!".green().bold());
    println!();
    println!("  {}: {}", "Output".cyan(), output.display());
    println!(
        "  {}: {} new, {} changed, {} same, {} removed",
        "Payload files".cyan(),
        stats.new,
        stats.changed,
        stats.same,
        stats.removed
    );
    println!("  {}: {}", "Full archive size".cyan(), super::format_size(new_size));
    println!("  {}: {}", "Delta size".cyan(), super::format_size(delta_size));
    println!("  {}: {:.1}%", "Size savings".cyan(), savings);

    if stats.warnings > 0 {
        println!();
        println!(
            "{} {} file(s) needed retries during diffing.",
            "Note:".yellow().bold(),
            stats.warnings
        );
    }

    Ok(())
}
