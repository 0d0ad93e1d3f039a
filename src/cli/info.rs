//! Inspect a delta archive

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Result};
use colored::Colorize;
use serde::Serialize;

use crate::archive;
use crate::layout;

/// Per-class entry counts of a delta archive
#[derive(Debug, Default, Serialize)]
struct DeltaSummary {
    name: String,
    version: String,
    added: usize,
    changed: usize,
    unchanged: usize,
    metadata: usize,
}

pub fn run(delta: &Path, json: bool) -> Result<()> {
    if !delta.exists() {
        bail!("Delta archive not found: {}", delta.display());
    }

    let manifest = archive::read_manifest(delta)?;
    let entries = archive::list_entries(delta)?;

    let mut added: HashSet<String> = HashSet::new();
    let mut changed: HashSet<String> = HashSet::new();
    let mut unchanged: HashSet<String> = HashSet::new();
    let mut metadata = 0usize;

    for (rel, size) in &entries {
        if !layout::is_lib_path(rel) {
            metadata += 1;
            continue;
        }
        if layout::is_shasum_path(rel) {
            continue;
        }

        let canonical = layout::canonical_path(rel);
        if layout::is_patch_path(rel) {
            if *size == 0 {
                unchanged.insert(canonical);
            } else {
                changed.insert(canonical);
            }
        } else {
            added.insert(canonical);
        }
    }

    // A target with both marker kinds counts as changed
    for canonical in &changed {
        unchanged.remove(canonical);
    }

    let summary = DeltaSummary {
        name: manifest.name,
        version: manifest.version,
        added: added.len(),
        changed: changed.len(),
        unchanged: unchanged.len(),
        metadata,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let delta_size = std::fs::metadata(delta).map(|m| m.len()).unwrap_or(0);

    println!("{}", "Delta Archive Information".cyan().bold());
    println!();
    println!("  {}: {}", "Application".cyan(), summary.name.bold());
    println!("  {}: {}", "Target version".cyan(), summary.version);
    println!("  {}: {}", "Archive size".cyan(), super::format_size(delta_size));
    println!();
    println!("{}", "Payload operations".cyan().bold());
    println!("  {}: {}", "Added".cyan(), summary.added);
    println!("  {}: {}", "Changed".cyan(), summary.changed);
    println!("  {}: {}", "Unchanged".cyan(), summary.unchanged);
    println!("  {}: {}", "Metadata files".cyan(), summary.metadata);

    Ok(())
}
