//! Delta archive layout conventions
//!
//! Inside a delta archive, everything under the `lib/` root encodes a
//! per-file operation through its suffix:
//!
//! - `lib/<path>` — file added in the new release, carried in full
//! - `lib/<path>.bsdiff` — binary patch against the base revision
//! - `lib/<path>.diff` — legacy msdelta patch (consumed, never produced)
//! - `lib/<path>.shasum` — identity record of the target bytes
//!
//! A zero-length `.bsdiff`/`.diff` with a zero-length `.shasum` marks an
//! unchanged file. Removals carry no marker at all: a base file with no
//! delta entry is deleted on apply. Files outside `lib/` pass through
//! verbatim. Path matching is case-insensitive throughout.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Payload root inside release and delta archives
pub const LIB_SEGMENT: &str = "lib";

/// Binary patch sidecar suffix
pub const BSDIFF_SUFFIX: &str = ".bsdiff";

/// Legacy msdelta sidecar suffix
pub const MSDELTA_SUFFIX: &str = ".diff";

/// Identity record sidecar suffix
pub const SHASUM_SUFFIX: &str = ".shasum";

/// Content-type manifest at the archive root
pub const CONTENT_TYPES_FILE: &str = ".CONTENTTYPES";

/// Extensions the delta encoding introduces into the manifest
const PATCH_EXTENSIONS: [&str; 3] = ["bsdiff", "diff", "shasum"];

/// How a new-tree file relates to the base tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not present in the base: carried in full
    New,
    /// Byte-identical to the base: empty markers
    Same,
    /// Present in the base with different bytes: patch + shasum
    Changed,
}

/// Whether a forward-slash relative path sits under the `lib/` root
pub fn is_lib_path(rel: &str) -> bool {
    match rel.split_once('/') {
        Some((first, rest)) => first.eq_ignore_ascii_case(LIB_SEGMENT) && !rest.is_empty(),
        None => false,
    }
}

/// Whether a path carries one of the patch sidecar suffixes
pub fn is_patch_path(rel: &str) -> bool {
    ends_with_ignore_case(rel, BSDIFF_SUFFIX) || ends_with_ignore_case(rel, MSDELTA_SUFFIX)
}

/// Whether a path is an identity-record sidecar
pub fn is_shasum_path(rel: &str) -> bool {
    ends_with_ignore_case(rel, SHASUM_SUFFIX)
}

/// Strip a trailing `.bsdiff`/`.diff`, preserving case
pub fn strip_patch_suffix(rel: &str) -> &str {
    for suffix in [BSDIFF_SUFFIX, MSDELTA_SUFFIX] {
        if ends_with_ignore_case(rel, suffix) {
            return &rel[..rel.len() - suffix.len()];
        }
    }
    rel
}

/// Canonical form of a delta entry path: patch suffix stripped, lowercased
pub fn canonical_path(rel: &str) -> String {
    strip_patch_suffix(rel).to_ascii_lowercase()
}

/// Path of the identity record belonging to a patch entry
pub fn shasum_companion(rel: &str) -> String {
    format!("{}{}", strip_patch_suffix(rel), SHASUM_SUFFIX)
}

/// Append a sidecar suffix to an on-disk target path
pub fn sidecar_path(target: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// All sidecar paths a builder worker may have written for a target
pub fn sidecar_paths(target: &Path) -> [PathBuf; 3] {
    [
        sidecar_path(target, BSDIFF_SUFFIX),
        sidecar_path(target, MSDELTA_SUFFIX),
        sidecar_path(target, SHASUM_SUFFIX),
    ]
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value
            .get(value.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// Content-type manifest carried at the archive root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentTypes {
    /// Declared file extensions, without leading dots
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl ContentTypes {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn store(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Declare the delta sidecar extensions in a tree's content-type manifest
///
/// Called by the builder on the delta scratch tree before repacking. Creates
/// the manifest if the release never carried one.
pub fn declare_patch_content_types(root: &Path) -> Result<()> {
    let path = root.join(CONTENT_TYPES_FILE);
    let mut manifest = if path.exists() {
        ContentTypes::load(&path)?
    } else {
        ContentTypes::default()
    };

    for ext in PATCH_EXTENSIONS {
        if !manifest.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            manifest.extensions.push(ext.to_string());
        }
    }

    manifest.store(&path)
}

/// Remove the delta sidecar declarations from a reconstructed tree
///
/// The inverse of [`declare_patch_content_types`]: once a delta has been
/// applied no sidecars remain, so the reconstructed archive's manifest must
/// match the original release again. A manifest left empty is deleted.
pub fn retract_patch_content_types(root: &Path) -> Result<()> {
    let path = root.join(CONTENT_TYPES_FILE);
    if !path.exists() {
        return Ok(());
    }

    let mut manifest = ContentTypes::load(&path)?;
    manifest
        .extensions
        .retain(|e| !PATCH_EXTENSIONS.iter().any(|p| e.eq_ignore_ascii_case(p)));

    if manifest.extensions.is_empty() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(())
    } else {
        manifest.store(&path)
    }
}
