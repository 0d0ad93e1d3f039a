//! Release archive container (.tar.zst)
//!
//! A release archive is a zstd-compressed tar of a file tree:
//! - `.RELINFO`: release manifest (TOML) naming the application and version
//! - `.CONTENTTYPES`: declared file extensions (optional)
//! - `lib/...`: the payload tree the delta engine operates on
//! - anything else: metadata carried verbatim
//!
//! These are container primitives only; the delta semantics live in the
//! builder and applier.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::version::Version;

/// Release manifest file at the archive root
pub const MANIFEST_FILE: &str = ".RELINFO";

/// Compression level for repacking, matching the package toolchain
const ZSTD_LEVEL: i32 = 19;

/// Release manifest (stored as .RELINFO)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    /// Application name
    pub name: String,

    /// Release version string (loose semantic version)
    pub version: String,
}

impl ReleaseManifest {
    /// Parse the manifest's version string
    pub fn parsed_version(&self) -> crate::error::Result<Version> {
        Version::parse(&self.version)
    }
}

/// Read the release manifest without extracting the archive
pub fn read_manifest(archive: &Path) -> Result<ReleaseManifest> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(file))
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;
    let mut tar = tar::Archive::new(decoder);

    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        if entry_rel_path(&path) == MANIFEST_FILE {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            return toml::from_str(&content)
                .with_context(|| format!("Failed to parse {} in {}", MANIFEST_FILE, archive.display()));
        }
    }

    bail!(
        "Archive {} carries no {} manifest",
        archive.display(),
        MANIFEST_FILE
    )
}

/// List every file entry in an archive as (relative path, size)
pub fn list_entries(archive: &Path) -> Result<Vec<(String, u64)>> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(file))?;
    let mut tar = tar::Archive::new(decoder);

    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_path_buf();
        let rel = entry_rel_path(&path);
        if !rel.is_empty() {
            entries.push((rel, entry.size()));
        }
    }
    Ok(entries)
}

/// Expand an archive into a directory
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(file))
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(dest)
        .with_context(|| format!("Failed to extract {} into {}", archive.display(), dest.display()))?;
    Ok(())
}

/// Pack a directory tree into an archive
pub fn pack_archive(src_dir: &Path, output: &Path) -> Result<()> {
    let file = File::create(output)
        .with_context(|| format!("Failed to create archive: {}", output.display()))?;
    let encoder = zstd::stream::Encoder::new(BufWriter::new(file), ZSTD_LEVEL)?;

    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", src_dir)
        .with_context(|| format!("Failed to add {} to archive", src_dir.display()))?;

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok(())
}

/// Recursively list all regular files below a directory
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(&path, files)?;
            } else {
                files.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, &mut files)?;
    files.sort();
    Ok(files)
}

/// Relative path of `path` below `root`, with forward slashes
pub fn relative_path_str(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{} is not below {}", path.display(), root.display()))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Acquire a scratch directory, optionally below a configured root
///
/// The directory and everything in it is removed when the handle drops,
/// on every exit path.
pub fn scratch_dir(base: Option<&Path>, label: &str) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    let prefix = format!("updelta-{}-", label);
    builder.prefix(&prefix);

    let dir = match base {
        Some(root) => {
            fs::create_dir_all(root)
                .with_context(|| format!("Failed to create scratch root {}", root.display()))?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
    .context("Failed to create scratch directory")?;

    Ok(dir)
}

/// Forward-slash form of a tar entry path, without any leading `./`
fn entry_rel_path(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
