//! Delta archive builder
//!
//! Walks the new release's `lib/` tree against the base release, classifies
//! every payload file as new, unchanged, or changed, and rewrites the new
//! tree in place into the delta encoding before repacking it. Diffing runs
//! on a bounded worker pool with per-file retries; a poller thread logs the
//! classification counters while the pool drains.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;

use crate::archive::{self, ReleaseManifest};
use crate::config::{self, Config};
use crate::error::UpdeltaError;
use crate::layout::{self, Classification};
use crate::patch;
use crate::progress::{BuildCounters, BuildStats};
use crate::release::ReleaseEntry;

/// Pause between attempts at a failed per-file operation
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Sampling interval of the counter poller
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// One payload file queued for classification
struct WorkItem {
    /// Forward-slash path relative to the new scratch root
    rel: String,
    /// Absolute path inside the new scratch tree
    abs: PathBuf,
}

/// Builds a delta archive from a base release and a new release
#[derive(Debug)]
pub struct DeltaBuilder {
    base_path: PathBuf,
    new_path: PathBuf,
    base_manifest: ReleaseManifest,
    new_manifest: ReleaseManifest,
    workers: usize,
    retries: u32,
    scratch_root: Option<PathBuf>,
}

impl DeltaBuilder {
    /// Create a builder for the given archive pair
    ///
    /// Reads both release manifests and refuses mismatched application
    /// names or a base version ordering after the new version.
    pub fn new(base: &Path, new: &Path) -> Result<Self> {
        for input in [base, new] {
            if !input.exists() {
                return Err(UpdeltaError::MissingInput(input.to_path_buf()).into());
            }
        }

        let base_manifest = archive::read_manifest(base)?;
        let new_manifest = archive::read_manifest(new)?;

        if base_manifest.name != new_manifest.name {
            bail!(
                "Application names don't match: {} vs {}",
                base_manifest.name,
                new_manifest.name
            );
        }

        let base_version = base_manifest.parsed_version()?;
        let new_version = new_manifest.parsed_version()?;
        if base_version > new_version {
            return Err(UpdeltaError::NonMonotonicVersion {
                base: base_version.to_string(),
                new: new_version.to_string(),
            }
            .into());
        }

        Ok(Self {
            base_path: base.to_path_buf(),
            new_path: new.to_path_buf(),
            base_manifest,
            new_manifest,
            workers: config::worker_count(),
            retries: 3,
            scratch_root: None,
        })
    }

    /// Apply worker, retry, and scratch settings from the configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        self.workers = config.build.workers.clamp(1, 8);
        self.retries = config.build.retries.max(1);
        self.scratch_root = config.paths.scratch_dir.clone();
        self
    }

    /// Manifest of the base release
    pub fn base_manifest(&self) -> &ReleaseManifest {
        &self.base_manifest
    }

    /// Manifest of the new release
    pub fn new_manifest(&self) -> &ReleaseManifest {
        &self.new_manifest
    }

    /// Build the delta archive at `output`
    ///
    /// Returns the final classification counters. The output path must not
    /// exist; scratch trees are removed on every exit path.
    pub fn build(&self, output: &Path) -> Result<BuildStats> {
        if output.exists() {
            return Err(UpdeltaError::OutputExists(output.to_path_buf()).into());
        }

        let base_scratch = archive::scratch_dir(self.scratch_root.as_deref(), "base")?;
        let delta_scratch = archive::scratch_dir(self.scratch_root.as_deref(), "delta")?;

        archive::extract_archive(&self.base_path, base_scratch.path())?;
        archive::extract_archive(&self.new_path, delta_scratch.path())?;

        let base_index = index_lib_files(base_scratch.path())?;
        let work = lib_work_items(delta_scratch.path())?;

        tracing::info!(
            "Diffing {} payload files against {} base files with {} workers",
            work.len(),
            base_index.len(),
            self.workers
        );

        let counters = BuildCounters::default();
        self.run_pool(&work, &base_index, &counters)?;

        // Whatever the workers did not claim from the index was removed in
        // the new release. No artifact is written; the applier infers
        // removals from absence.
        counters.set_removed(base_index.len() as u64);

        let stats = counters.snapshot();
        tracing::info!(
            "Delta classification: {} new, {} changed, {} same, {} removed, {} warnings",
            stats.new,
            stats.changed,
            stats.same,
            stats.removed,
            stats.warnings
        );

        layout::declare_patch_content_types(delta_scratch.path())?;

        if let Err(e) = archive::pack_archive(delta_scratch.path(), output) {
            fs::remove_file(output).ok();
            return Err(e);
        }

        Ok(stats)
    }

    /// Drain the work list through a bounded worker pool
    ///
    /// Workers share an atomic cursor over the list; the first file whose
    /// retries are exhausted stops the pool and fails the build.
    fn run_pool(
        &self,
        work: &[WorkItem],
        base_index: &DashMap<String, PathBuf>,
        counters: &BuildCounters,
    ) -> Result<()> {
        let cursor = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        thread::scope(|scope| {
            let poller = scope.spawn(move || {
                let mut last_processed = 0;
                loop {
                    match done_rx.recv_timeout(PROGRESS_INTERVAL) {
                        Err(RecvTimeoutError::Timeout) => {
                            let stats = counters.snapshot();
                            if stats.processed > last_processed {
                                last_processed = stats.processed;
                                tracing::info!(
                                    "Processed {}/{} payload files ({} new, {} changed, {} same, {} warnings)",
                                    stats.processed,
                                    work.len(),
                                    stats.new,
                                    stats.changed,
                                    stats.same,
                                    stats.warnings
                                );
                            }
                        }
                        _ => break,
                    }
                }
            });

            let handles: Vec<_> = (0..self.workers)
                .map(|_| {
                    scope.spawn(|| {
                        while !failed.load(Ordering::Relaxed) {
                            let idx = cursor.fetch_add(1, Ordering::Relaxed);
                            let Some(item) = work.get(idx) else { break };

                            let result = with_retries(self.retries, RETRY_BACKOFF, || {
                                process_file(item, base_index, counters)
                            });

                            if let Err(e) = result {
                                failed.store(true, Ordering::Relaxed);
                                let mut slot = first_error.lock().unwrap_or_else(|p| p.into_inner());
                                if slot.is_none() {
                                    *slot = Some(e.context(format!("Failed to process {}", item.rel)));
                                }
                                break;
                            }
                        }
                    })
                })
                .collect();

            for handle in handles {
                if handle.join().is_err() {
                    failed.store(true, Ordering::Relaxed);
                }
            }

            drop(done_tx);
            let _ = poller.join();
        });

        let error = first_error.into_inner().unwrap_or_else(|p| p.into_inner());
        if let Some(e) = error {
            return Err(e);
        }
        if failed.load(Ordering::Relaxed) {
            bail!("A diff worker panicked");
        }
        Ok(())
    }
}

/// Classify one new-tree payload file and rewrite it into the delta encoding
///
/// Ordering matters: sidecars are fully written before the source payload
/// is deleted, and the base-index entry is only claimed after that. Partial
/// sidecars are removed before the error surfaces to the retry layer.
fn process_file(
    item: &WorkItem,
    base_index: &DashMap<String, PathBuf>,
    counters: &BuildCounters,
) -> Result<()> {
    let key = item.rel.to_ascii_lowercase();
    let base_file = match base_index.get(&key) {
        Some(entry) => entry.value().clone(),
        None => {
            // Added in the new release: the full payload stays in the tree.
            counters.note_new();
            return Ok(());
        }
    };

    match encode_against_base(item, &base_file) {
        Ok(Classification::Same) => counters.note_same(),
        Ok(_) => counters.note_changed(),
        Err(e) => {
            for sidecar in layout::sidecar_paths(&item.abs) {
                fs::remove_file(sidecar).ok();
            }
            counters.note_warning();
            return Err(e);
        }
    }

    base_index.remove(&key);
    Ok(())
}

/// Replace a payload file with its delta encoding against the base revision
fn encode_against_base(item: &WorkItem, base_file: &Path) -> Result<Classification> {
    let new_bytes = fs::read(&item.abs)
        .with_context(|| format!("Failed to read {}", item.abs.display()))?;
    let base_bytes = fs::read(base_file)
        .with_context(|| format!("Failed to read {}", base_file.display()))?;

    if new_bytes == base_bytes {
        // Empty markers: patch and record both zero-length.
        fs::write(layout::sidecar_path(&item.abs, layout::MSDELTA_SUFFIX), b"")?;
        fs::write(layout::sidecar_path(&item.abs, layout::SHASUM_SUFFIX), b"")?;
        fs::remove_file(&item.abs)?;
        return Ok(Classification::Same);
    }

    let patch_bytes = patch::create_patch(&base_bytes, &new_bytes).map_err(|e| {
        UpdeltaError::PatchFailed {
            path: item.rel.clone(),
            reason: e.to_string(),
        }
    })?;

    let label = item
        .rel
        .rsplit('/')
        .next()
        .unwrap_or(item.rel.as_str());
    let entry = ReleaseEntry::from_reader(label, &new_bytes[..])?;

    fs::write(layout::sidecar_path(&item.abs, layout::BSDIFF_SUFFIX), &patch_bytes)?;
    fs::write(
        layout::sidecar_path(&item.abs, layout::SHASUM_SUFFIX),
        format!("{}\n", entry),
    )?;
    fs::remove_file(&item.abs)?;

    Ok(Classification::Changed)
}

/// Index a tree's `lib/` files by lowercased relative path
fn index_lib_files(root: &Path) -> Result<DashMap<String, PathBuf>> {
    let index = DashMap::new();
    for abs in archive::list_files(root)? {
        let rel = archive::relative_path_str(root, &abs)?;
        if layout::is_lib_path(&rel) {
            index.insert(rel.to_ascii_lowercase(), abs);
        }
    }
    Ok(index)
}

/// Collect the new tree's `lib/` files as work items
fn lib_work_items(root: &Path) -> Result<Vec<WorkItem>> {
    let mut items = Vec::new();
    for abs in archive::list_files(root)? {
        let rel = archive::relative_path_str(root, &abs)?;
        if layout::is_lib_path(&rel) {
            items.push(WorkItem { rel, abs });
        }
    }
    Ok(items)
}

/// Run an operation up to `attempts` times with a short pause in between
fn with_retries<T>(
    attempts: u32,
    backoff: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tracing::info!("Retry attempt {} of {}", attempt, attempts);
            thread::sleep(backoff);
        }

        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!("Attempt {} failed: {}", attempt, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after {} attempts", attempts)))
}
