// Engine metrics module
//
// Lightweight counters for what a helper process has done over its lifetime

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Engine-wide counters
///
/// Atomic so worker tasks can record without locking. Logged on demand and
/// when the helper shuts down.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Files deleted (or counted as freed in a dry run)
    pub files_freed: AtomicUsize,

    /// Files whose deletion failed
    pub files_failed: AtomicUsize,

    /// Files that disappeared before we could delete them
    pub files_vanished: AtomicUsize,

    /// Bytes freed across all runs
    pub bytes_freed: AtomicU64,

    /// Categories that produced a result
    pub categories_processed: AtomicUsize,

    /// Scan passes completed
    pub scans_completed: AtomicUsize,

    /// Times the decision caches were dropped
    pub cache_clears: AtomicU64,

    /// Total time spent in cleanup runs, in milliseconds
    pub cleanup_time_ms: AtomicU64,

    start_time: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            files_freed: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            files_vanished: AtomicUsize::new(0),
            bytes_freed: AtomicU64::new(0),
            categories_processed: AtomicUsize::new(0),
            scans_completed: AtomicUsize::new(0),
            cache_clears: AtomicU64::new(0),
            cleanup_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_freed(&self, bytes: u64) {
        self.files_freed.fetch_add(1, Ordering::Relaxed);
        self.bytes_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vanished(&self) {
        self.files_vanished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_category(&self) {
        self.categories_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_clear(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup_time(&self, duration: Duration) {
        self.cleanup_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average time per processed category in milliseconds
    pub fn avg_category_time_ms(&self) -> f64 {
        let total = self.cleanup_time_ms.load(Ordering::Relaxed);
        let count = self.categories_processed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Engine Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Files: {} freed, {} failed, {} vanished ({} bytes)",
            self.files_freed.load(Ordering::Relaxed),
            self.files_failed.load(Ordering::Relaxed),
            self.files_vanished.load(Ordering::Relaxed),
            self.bytes_freed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Categories: {} processed (avg {:.2}ms), scans: {}, cache clears: {}",
            self.categories_processed.load(Ordering::Relaxed),
            self.avg_category_time_ms(),
            self.scans_completed.load(Ordering::Relaxed),
            self.cache_clears.load(Ordering::Relaxed)
        );
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
