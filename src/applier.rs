//! Delta archive applier
//!
//! Reconstructs a full release archive by applying a delta onto a base.
//! Runs single-threaded: extract delta, extract base into a working tree,
//! replay every `lib/` operation with per-file verification, reconcile
//! deletions, overwrite metadata, repack. Coarse percent checkpoints are
//! reported through the caller's progress callback: 25 after the delta
//! extract, 50 after the base extract, 75 once all patches are applied,
//! 80 after deletions, 100 when the output archive is written.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::archive;
use crate::error::UpdeltaError;
use crate::layout;
use crate::patch;
use crate::progress::ProgressReporter;
use crate::release::ReleaseEntry;

/// Reconstructs a full archive from a base archive plus a delta archive
pub struct DeltaApplier {
    base_path: PathBuf,
    delta_path: PathBuf,
    scratch_root: Option<PathBuf>,
}

impl DeltaApplier {
    pub fn new(base: &Path, delta: &Path) -> Result<Self> {
        for input in [base, delta] {
            if !input.exists() {
                return Err(UpdeltaError::MissingInput(input.to_path_buf()).into());
            }
        }

        Ok(Self {
            base_path: base.to_path_buf(),
            delta_path: delta.to_path_buf(),
            scratch_root: None,
        })
    }

    /// Place scratch trees below a configured root instead of system temp
    pub fn with_scratch_root(mut self, root: Option<PathBuf>) -> Self {
        self.scratch_root = root;
        self
    }

    /// Apply the delta, writing the reconstructed archive at `output`
    ///
    /// The output path must not exist. Nothing is written there unless the
    /// whole reconstruction, including per-file verification, succeeds.
    pub fn apply(&self, output: &Path, progress: Option<Box<dyn FnMut(u8)>>) -> Result<()> {
        if output.exists() {
            return Err(UpdeltaError::OutputExists(output.to_path_buf()).into());
        }

        let mut reporter = ProgressReporter::new(progress);

        let delta_scratch = archive::scratch_dir(self.scratch_root.as_deref(), "delta")?;
        archive::extract_archive(&self.delta_path, delta_scratch.path())?;
        reporter.report(25);

        let work_scratch = archive::scratch_dir(self.scratch_root.as_deref(), "work")?;
        archive::extract_archive(&self.base_path, work_scratch.path())?;
        reporter.report(50);

        let delta_root = delta_scratch.path();
        let work_root = work_scratch.path();

        // Enumerate the delta's relative paths once; everything below
        // dispatches off this snapshot.
        let entries: Vec<String> = archive::list_files(delta_root)?
            .iter()
            .map(|abs| archive::relative_path_str(delta_root, abs))
            .collect::<Result<_>>()?;
        let lowered: HashSet<String> = entries.iter().map(|r| r.to_ascii_lowercase()).collect();

        // Case-insensitive index of the working tree's payload files
        let mut work_index: HashMap<String, PathBuf> = HashMap::new();
        for abs in archive::list_files(work_root)? {
            let rel = archive::relative_path_str(work_root, &abs)?;
            if layout::is_lib_path(&rel) {
                work_index.insert(rel.to_ascii_lowercase(), abs);
            }
        }

        let mut visited: HashSet<String> = HashSet::new();

        for rel in &entries {
            if !layout::is_lib_path(rel) || layout::is_shasum_path(rel) {
                continue;
            }

            // A .bsdiff sibling supersedes a legacy .diff for the same target
            if rel.to_ascii_lowercase().ends_with(layout::MSDELTA_SUFFIX) {
                let sibling = format!("{}{}", layout::canonical_path(rel), layout::BSDIFF_SUFFIX);
                if lowered.contains(&sibling) {
                    tracing::debug!("Skipping {}: superseded by a bsdiff sidecar", rel);
                    continue;
                }
            }

            let canonical = layout::canonical_path(rel);
            visited.insert(canonical.clone());

            let delta_file = delta_root.join(rel);
            if layout::is_patch_path(rel) {
                if fs::metadata(&delta_file)?.len() == 0 {
                    // Unchanged: the base copy stays in place
                    tracing::debug!("{} is unchanged", canonical);
                    continue;
                }
                self.patch_file(rel, &canonical, &delta_file, delta_root, &work_index)?;
            } else {
                // Added file: carried in full, copied over the working tree
                let target = match work_index.get(&canonical) {
                    Some(existing) => existing.clone(),
                    None => work_root.join(rel),
                };
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&delta_file, &target)
                    .with_context(|| format!("Failed to copy {}", rel))?;
                work_index.insert(canonical, target);
            }
        }

        reporter.report(75);

        // Deletions are implicit: base payload files with no delta
        // representation are dropped.
        for abs in archive::list_files(work_root)? {
            let rel = archive::relative_path_str(work_root, &abs)?;
            if layout::is_lib_path(&rel) && !visited.contains(&rel.to_ascii_lowercase()) {
                tracing::debug!("Deleting {}", rel);
                fs::remove_file(&abs)
                    .with_context(|| format!("Failed to delete {}", rel))?;
            }
        }
        prune_empty_dirs(work_root)?;

        reporter.report(80);

        // Metadata outside lib/ is overwritten from the delta
        for rel in &entries {
            if layout::is_lib_path(rel) {
                continue;
            }
            let target = work_root.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(delta_root.join(rel), &target)
                .with_context(|| format!("Failed to copy {}", rel))?;
        }

        // No sidecars remain, so the manifest must not declare them anymore
        layout::retract_patch_content_types(work_root)?;

        if let Err(e) = archive::pack_archive(work_root, output) {
            fs::remove_file(output).ok();
            return Err(e);
        }
        reporter.report(100);

        Ok(())
    }

    /// Apply one patch sidecar onto its working-tree target
    ///
    /// The result is written to a temp file, verified against the delta's
    /// identity record, and only then moved into place; the working tree
    /// never observes a partially written payload.
    fn patch_file(
        &self,
        rel: &str,
        canonical: &str,
        patch_path: &Path,
        delta_root: &Path,
        work_index: &HashMap<String, PathBuf>,
    ) -> Result<()> {
        let target = work_index.get(canonical).cloned().ok_or_else(|| {
            UpdeltaError::PatchFailed {
                path: rel.to_string(),
                reason: "no matching payload in the base archive".to_string(),
            }
        })?;

        let record_path = delta_root.join(layout::shasum_companion(rel));
        let record = fs::read_to_string(&record_path)
            .with_context(|| format!("Failed to read identity record for {}", rel))?;
        let expected = ReleaseEntry::parse(&record)?;

        let parent = target.parent().unwrap_or(delta_root);
        let mut staged = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create staging file")?;

        if rel.to_ascii_lowercase().ends_with(layout::BSDIFF_SUFFIX) {
            let old_bytes = fs::read(&target)
                .with_context(|| format!("Failed to read {}", target.display()))?;
            let patch_bytes = fs::read(patch_path)
                .with_context(|| format!("Failed to read {}", patch_path.display()))?;
            let new_bytes =
                patch::apply_patch(&old_bytes, &patch_bytes).map_err(|e| {
                    UpdeltaError::PatchFailed {
                        path: canonical.to_string(),
                        reason: e.to_string(),
                    }
                })?;
            staged.write_all(&new_bytes)?;
            staged.flush()?;
        } else {
            patch::apply_msdelta(patch_path, &target, staged.path()).map_err(|e| {
                UpdeltaError::PatchFailed {
                    path: canonical.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }

        verify_patched_file(staged.path(), &expected, canonical)?;

        staged.persist(&target).map_err(|e| {
            anyhow::anyhow!("Failed to move patched {} into place: {}", canonical, e)
        })?;
        Ok(())
    }
}

/// Compare a patched payload against its identity record
fn verify_patched_file(patched: &Path, expected: &ReleaseEntry, canonical: &str) -> Result<()> {
    let file = fs::File::open(patched)?;
    let actual = ReleaseEntry::from_reader(&expected.filename, std::io::BufReader::new(file))?;

    if !actual.matches(expected) {
        tracing::warn!(
            "Verification failed for {}: expected {} {} bytes, got {} {} bytes",
            canonical,
            expected.sha1,
            expected.size,
            actual.sha1,
            actual.size
        );
        return Err(UpdeltaError::ChecksumFailed {
            path: canonical.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Drop directories left empty by deletion reconciliation
fn prune_empty_dirs(root: &Path) -> Result<()> {
    fn prune(dir: &Path) -> Result<bool> {
        let mut empty = true;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if prune(&entry.path())? {
                    fs::remove_dir(entry.path())?;
                } else {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        Ok(empty)
    }

    prune(root)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DeltaBuilder;

    /// Write a release tree and pack it into an archive
    fn make_release(dir: &Path, label: &str, version: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let tree = dir.join(format!("{}-tree", label));
        fs::create_dir_all(&tree).unwrap();
        fs::write(
            tree.join(".RELINFO"),
            format!("name = \"app\"\nversion = \"{}\"\n", version),
        )
        .unwrap();
        for (rel, bytes) in files {
            let path = tree.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, bytes).unwrap();
        }

        let archive_path = dir.join(format!("{}.tar.zst", label));
        archive::pack_archive(&tree, &archive_path).unwrap();
        archive_path
    }

    fn build_delta(dir: &Path, base: &Path, new: &Path) -> PathBuf {
        let delta = dir.join("delta.tar.zst");
        DeltaBuilder::new(base, new).unwrap().build(&delta).unwrap();
        delta
    }

    /// All files below a root as (forward-slash relative path, bytes)
    fn tree_contents(root: &Path) -> Vec<(String, Vec<u8>)> {
        archive::list_files(root)
            .unwrap()
            .iter()
            .map(|abs| {
                (
                    archive::relative_path_str(root, abs).unwrap(),
                    fs::read(abs).unwrap(),
                )
            })
            .collect()
    }

    fn extract(archive_path: &Path, dir: &Path, label: &str) -> PathBuf {
        let dest = dir.join(label);
        archive::extract_archive(archive_path, &dest).unwrap();
        dest
    }

    #[test]
    fn test_round_trip_reconstructs_new_release_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let unchanged = vec![0x5Au8; 9_000];
        let old_payload: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
        let mut new_payload = old_payload.clone();
        new_payload[12_345] ^= 0x80;

        let base = make_release(
            dir.path(),
            "base",
            "1.0",
            &[
                ("lib/same.dll", &unchanged[..]),
                ("lib/app.dll", &old_payload[..]),
                ("lib/gone.dll", b"removed in the new release"),
                ("README.txt", b"old notes"),
            ],
        );
        let new = make_release(
            dir.path(),
            "new",
            "1.1",
            &[
                ("lib/same.dll", &unchanged[..]),
                ("lib/app.dll", &new_payload[..]),
                ("lib/extra/new.dll", b"added payload"),
                ("README.txt", b"new notes"),
            ],
        );

        let delta = build_delta(dir.path(), &base, &new);

        let output = dir.path().join("rebuilt.tar.zst");
        let mut seen: Vec<u8> = Vec::new();
        {
            let sink = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
            let cb_sink = std::rc::Rc::clone(&sink);
            DeltaApplier::new(&base, &delta)
                .unwrap()
                .apply(&output, Some(Box::new(move |p| cb_sink.borrow_mut().push(p))))
                .unwrap();
            seen.extend(sink.borrow().iter());
        }

        // Checkpoints arrive in order, strictly increasing
        assert_eq!(seen, vec![25, 50, 75, 80, 100]);

        // Bit-identical tree: same membership, same bytes, metadata included
        let rebuilt = tree_contents(&extract(&output, dir.path(), "rebuilt-tree"));
        let expected = tree_contents(&extract(&new, dir.path(), "expected-tree"));
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn test_unchanged_payload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0u8; 100];
        let base = make_release(dir.path(), "base", "1.0", &[("lib/x.dll", &payload[..])]);
        let new = make_release(dir.path(), "new", "1.1", &[("lib/x.dll", &payload[..])]);
        let delta = build_delta(dir.path(), &base, &new);

        let output = dir.path().join("rebuilt.tar.zst");
        DeltaApplier::new(&base, &delta).unwrap().apply(&output, None).unwrap();

        let rebuilt = extract(&output, dir.path(), "rebuilt-tree");
        assert_eq!(fs::read(rebuilt.join("lib/x.dll")).unwrap(), payload);
        assert!(!rebuilt.join("lib/x.dll.diff").exists());
        assert!(!rebuilt.join("lib/x.dll.shasum").exists());
    }

    #[test]
    fn test_removed_payload_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let base = make_release(
            dir.path(),
            "base",
            "1.0",
            &[("lib/keep.dll", b"kept"), ("lib/sub/z.dll", b"obsolete")],
        );
        let new = make_release(dir.path(), "new", "2.0", &[("lib/keep.dll", b"kept")]);
        let delta = build_delta(dir.path(), &base, &new);

        let output = dir.path().join("rebuilt.tar.zst");
        DeltaApplier::new(&base, &delta).unwrap().apply(&output, None).unwrap();

        let rebuilt = extract(&output, dir.path(), "rebuilt-tree");
        assert!(rebuilt.join("lib/keep.dll").exists());
        assert!(!rebuilt.join("lib/sub/z.dll").exists());
        assert!(!rebuilt.join("lib/sub").exists());
    }

    #[test]
    fn test_corrupted_shasum_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let base = make_release(dir.path(), "base", "1.0", &[("lib/app.dll", &[0u8; 100])]);
        let new = make_release(dir.path(), "new", "1.1", &[("lib/app.dll", &[1u8; 100])]);
        let delta = build_delta(dir.path(), &base, &new);

        // Rewrite the identity record to a different digest
        let tampered_tree = extract(&delta, dir.path(), "tamper-tree");
        let bogus = ReleaseEntry::from_reader("app.dll", &[9u8; 100][..]).unwrap();
        fs::write(
            tampered_tree.join("lib/app.dll.shasum"),
            format!("{}\n", bogus),
        )
        .unwrap();
        let tampered = dir.path().join("tampered.tar.zst");
        archive::pack_archive(&tampered_tree, &tampered).unwrap();

        let output = dir.path().join("rebuilt.tar.zst");
        let err = DeltaApplier::new(&base, &tampered)
            .unwrap()
            .apply(&output, None)
            .unwrap_err();

        match err.downcast_ref::<UpdeltaError>() {
            Some(UpdeltaError::ChecksumFailed { path }) => assert_eq!(path, "lib/app.dll"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_corrupted_patch_payload_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let base = make_release(dir.path(), "base", "1.0", &[("lib/app.dll", &[0u8; 100])]);
        let new = make_release(dir.path(), "new", "1.1", &[("lib/app.dll", &[0xFFu8; 100])]);
        let delta = build_delta(dir.path(), &base, &new);

        // Flip one byte inside the patch's literal data; the op stream stays
        // structurally valid, so the corruption is only caught by the
        // identity record.
        let tampered_tree = extract(&delta, dir.path(), "tamper-tree");
        let patch_path = tampered_tree.join("lib/app.dll.bsdiff");
        let mut patch_bytes = fs::read(&patch_path).unwrap();
        let last = patch_bytes.len() - 1;
        patch_bytes[last] ^= 0x01;
        fs::write(&patch_path, patch_bytes).unwrap();
        let tampered = dir.path().join("tampered.tar.zst");
        archive::pack_archive(&tampered_tree, &tampered).unwrap();

        let output = dir.path().join("rebuilt.tar.zst");
        let err = DeltaApplier::new(&base, &tampered)
            .unwrap()
            .apply(&output, None)
            .unwrap_err();

        match err.downcast_ref::<UpdeltaError>() {
            Some(UpdeltaError::ChecksumFailed { path }) => assert_eq!(path, "lib/app.dll"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!output.exists());

        // And the base target was left untouched by the failed apply
        // (nothing was persisted over it in any scratch tree we can see,
        // and the original archive still opens).
        assert!(DeltaApplier::new(&base, &tampered).is_ok());
    }

    #[test]
    fn test_nonempty_msdelta_payload_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let base = make_release(dir.path(), "base", "1.0", &[("lib/app.dll", &[0u8; 64])]);
        let new = make_release(dir.path(), "new", "1.1", &[("lib/app.dll", &[1u8; 64])]);
        let delta = build_delta(dir.path(), &base, &new);

        // Replace the bsdiff sidecar pair with a legacy msdelta payload
        let tree = extract(&delta, dir.path(), "msdelta-tree");
        fs::remove_file(tree.join("lib/app.dll.bsdiff")).unwrap();
        fs::write(tree.join("lib/app.dll.diff"), b"PA30-legacy-payload").unwrap();
        let legacy = dir.path().join("legacy.tar.zst");
        archive::pack_archive(&tree, &legacy).unwrap();

        let output = dir.path().join("rebuilt.tar.zst");
        let err = DeltaApplier::new(&base, &legacy)
            .unwrap()
            .apply(&output, None)
            .unwrap_err();

        match err.downcast_ref::<UpdeltaError>() {
            Some(UpdeltaError::PatchFailed { path, reason }) => {
                assert_eq!(path, "lib/app.dll");
                assert!(reason.contains("msdelta"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_bsdiff_supersedes_sibling_msdelta() {
        let dir = tempfile::tempdir().unwrap();
        let base = make_release(dir.path(), "base", "1.0", &[("lib/app.dll", &[0u8; 64])]);
        let new = make_release(dir.path(), "new", "1.1", &[("lib/app.dll", &[1u8; 64])]);
        let delta = build_delta(dir.path(), &base, &new);

        // Add a bogus msdelta sidecar next to the real bsdiff one; the
        // bsdiff path must win and the apply must succeed.
        let tree = extract(&delta, dir.path(), "both-tree");
        fs::write(tree.join("lib/app.dll.diff"), b"should never be touched").unwrap();
        let both = dir.path().join("both.tar.zst");
        archive::pack_archive(&tree, &both).unwrap();

        let output = dir.path().join("rebuilt.tar.zst");
        DeltaApplier::new(&base, &both).unwrap().apply(&output, None).unwrap();

        let rebuilt = extract(&output, dir.path(), "rebuilt-tree");
        assert_eq!(fs::read(rebuilt.join("lib/app.dll")).unwrap(), vec![1u8; 64]);
    }

    #[test]
    fn test_rejects_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let base = make_release(dir.path(), "base", "1.0", &[("lib/a.dll", b"a")]);
        let new = make_release(dir.path(), "new", "1.1", &[("lib/a.dll", b"a")]);
        let delta = build_delta(dir.path(), &base, &new);

        let output = dir.path().join("rebuilt.tar.zst");
        fs::write(&output, b"occupied").unwrap();
        let err = DeltaApplier::new(&base, &delta)
            .unwrap()
            .apply(&output, None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpdeltaError>(),
            Some(UpdeltaError::OutputExists(_))
        ));
        assert_eq!(fs::read(&output).unwrap(), b"occupied");
    }
}
