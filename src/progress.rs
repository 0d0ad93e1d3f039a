//! Progress surfaces
//!
//! Two distinct surfaces, never unified: the applier reports coarse percent
//! checkpoints through a coalescing monotonic sink, while the builder
//! exposes raw classification counters that a poller thread samples on a
//! timer. Build work is not uniform, so it has no meaningful percent.

use std::sync::atomic::{AtomicU64, Ordering};

/// Coalescing, monotonic percent sink
///
/// Forwards a submitted percent to the callback only when it is strictly
/// greater than everything reported before; the consumer never observes
/// progress going backwards or repeating.
pub struct ProgressReporter {
    callback: Option<Box<dyn FnMut(u8)>>,
    last: Option<u8>,
}

impl ProgressReporter {
    pub fn new(callback: Option<Box<dyn FnMut(u8)>>) -> Self {
        Self { callback, last: None }
    }

    /// Submit a percent in [0, 100]
    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            if let Some(callback) = self.callback.as_mut() {
                callback(percent);
            }
        }
    }

    /// Highest percent reported so far
    pub fn last(&self) -> Option<u8> {
        self.last
    }
}

/// Shared classification counters for a build run
///
/// Workers update these with relaxed atomics; the poller and the final
/// summary only ever read snapshots.
#[derive(Debug, Default)]
pub struct BuildCounters {
    processed: AtomicU64,
    new: AtomicU64,
    changed: AtomicU64,
    same: AtomicU64,
    removed: AtomicU64,
    warnings: AtomicU64,
}

/// Point-in-time view of the build counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub processed: u64,
    pub new: u64,
    pub changed: u64,
    pub same: u64,
    pub removed: u64,
    pub warnings: u64,
}

impl BuildCounters {
    pub fn note_new(&self) {
        self.new.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_changed(&self) {
        self.changed.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_same(&self) {
        self.same.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_removed(&self, count: u64) {
        self.removed.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BuildStats {
        BuildStats {
            processed: self.processed.load(Ordering::Relaxed),
            new: self.new.load(Ordering::Relaxed),
            changed: self.changed.load(Ordering::Relaxed),
            same: self.same.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_reporter_is_monotonic_and_coalescing() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut reporter =
            ProgressReporter::new(Some(Box::new(move |p| sink.borrow_mut().push(p))));

        for percent in [0, 25, 25, 10, 50, 50, 75, 80, 100, 90] {
            reporter.report(percent);
        }

        assert_eq!(*seen.borrow(), vec![0, 25, 50, 75, 80, 100]);
        assert_eq!(reporter.last(), Some(100));
    }

    #[test]
    fn test_reporter_clamps_over_100() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut reporter =
            ProgressReporter::new(Some(Box::new(move |p| sink.borrow_mut().push(p))));

        reporter.report(250);
        reporter.report(100);
        assert_eq!(*seen.borrow(), vec![100]);
    }

    #[test]
    fn test_reporter_without_callback_still_tracks() {
        let mut reporter = ProgressReporter::new(None);
        reporter.report(40);
        reporter.report(20);
        assert_eq!(reporter.last(), Some(40));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = BuildCounters::default();
        counters.note_new();
        counters.note_changed();
        counters.note_changed();
        counters.note_same();
        counters.note_warning();
        counters.set_removed(3);

        let stats = counters.snapshot();
        assert_eq!(
            stats,
            BuildStats {
                processed: 4,
                new: 1,
                changed: 2,
                same: 1,
                removed: 3,
                warnings: 1,
            }
        );
    }
}
