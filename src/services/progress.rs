//! Progress reporting: callback type, throttled tracker, and band scaling.

use crate::models::{CleanupProgress, CleanupResult};
use camino::Utf8Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Callback invoked with progress snapshots during a cleanup.
///
/// Called from worker tasks, so it must be cheap and must not block. Async
/// consumers should forward snapshots through [`progress_channel`].
pub type ProgressCallback = Arc<dyn Fn(CleanupProgress) + Send + Sync>;

/// A callback that discards everything
pub fn ignore_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// A callback that forwards snapshots into an unbounded channel
pub fn progress_channel() -> (ProgressCallback, mpsc::UnboundedReceiver<CleanupProgress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ProgressCallback = Arc::new(move |progress| {
        // Receiver gone means nobody cares any more
        let _ = tx.send(progress);
    });
    (callback, rx)
}

/// How many files pass between two progress events for a set of `total` files
pub fn emit_interval(total: usize, steps: usize) -> usize {
    (total / steps.max(1)).max(1)
}

fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Default)]
struct Counters {
    processed: usize,
    freed: u64,
    last_percentage: f64,
}

/// Throttled progress for one file set.
///
/// Emits on every `emit_interval`-th file, on any file above the large-file
/// threshold (so a few huge files still move the bar), and on the last file.
/// Emission happens under the tracker's lock, which keeps percentages
/// monotonic even though files finish concurrently.
pub struct ProgressTracker {
    category_id: String,
    category_name: String,
    total: usize,
    every: usize,
    large_file_threshold: u64,
    counters: Mutex<Counters>,
    on_progress: ProgressCallback,
}

impl ProgressTracker {
    pub fn new(
        category_id: &str,
        category_name: &str,
        total: usize,
        steps: usize,
        large_file_threshold: u64,
        on_progress: ProgressCallback,
    ) -> Self {
        Self {
            category_id: category_id.to_string(),
            category_name: category_name.to_string(),
            total,
            every: emit_interval(total, steps),
            large_file_threshold,
            counters: Mutex::new(Counters::default()),
            on_progress,
        }
    }

    /// Count one finished file. Returns whether an event was emitted.
    pub fn advance(&self, file: &Utf8Path, size: u64, freed: u64) -> bool {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.processed += 1;
        counters.freed += freed;

        let due = counters.processed % self.every == 0
            || size > self.large_file_threshold
            || counters.processed >= self.total;
        if !due {
            return false;
        }

        let pct = percentage(counters.processed, self.total).max(counters.last_percentage);
        counters.last_percentage = pct;
        (self.on_progress)(CleanupProgress {
            category_id: self.category_id.clone(),
            category_name: self.category_name.clone(),
            current_file: file.to_string(),
            processed_files: counters.processed.min(self.total),
            total_files: self.total,
            freed_space: counters.freed,
            percentage: pct,
        });
        true
    }
}

/// Map a file set's 0..100 progress into a slice of a category's progress.
///
/// A category with several paths gives each path an equal band, and offsets
/// counters by what earlier paths already accomplished.
#[derive(Debug, Clone, Copy)]
pub struct ProgressBand {
    pub start: f64,
    pub end: f64,
    pub base_processed: usize,
    pub base_total: usize,
    pub base_freed: u64,
}

impl ProgressBand {
    /// The band for path `index` out of `count`, offset by the category
    /// result accumulated over earlier paths
    pub fn for_path(index: usize, count: usize, base: &CleanupResult) -> Self {
        let count = count.max(1) as f64;
        Self {
            start: index as f64 / count * 100.0,
            end: (index + 1) as f64 / count * 100.0,
            base_processed: base.processed_files,
            base_total: base.processed_files + base.skipped_files,
            base_freed: base.freed_space,
        }
    }

    pub fn wrap(self, inner: ProgressCallback) -> ProgressCallback {
        Arc::new(move |mut progress: CleanupProgress| {
            progress.percentage = (self.start
                + progress.percentage / 100.0 * (self.end - self.start))
                .clamp(0.0, 100.0);
            progress.processed_files += self.base_processed;
            progress.total_files += self.base_total;
            progress.freed_space += self.base_freed;
            inner(progress);
        })
    }
}
