use super::error::{CleanupAborted, EngineError};
use super::gate::AdmissionGate;
use super::progress::{ProgressBand, ProgressCallback, ProgressTracker};
use super::scanner::Scanner;
use super::verifier::FileVerifier;
use crate::metrics::EngineMetrics;
use crate::models::{CandidateFile, Category, CleanupOptions, CleanupProgress, CleanupResult};
use camino::{Utf8Path, Utf8PathBuf};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error recorded when nothing in a file set survives pre-validation
pub const NO_VALID_FILES: &str = "no valid files to process";

/// Error attached to the partial result of an interrupted file set
pub const CANCELLED_MARKER: &str = "Operation cancelled";

/// Smallest batch the adaptive sizing will produce
const MIN_BATCH: usize = 10;

/// Batch size for `count` files: one twentieth of the set, at least 10, at
/// most `configured`.
pub fn batch_size_for(count: usize, configured: usize) -> usize {
    configured.min((count / 20).max(MIN_BATCH)).max(1)
}

/// What happened to one file inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileOutcome {
    /// Deleted (or would have been, in a dry run) freeing this many bytes
    Freed(u64),
    /// Gone before we got to it
    Vanished,
    Failed(String),
    /// Never started because the run was cancelled
    Cancelled,
}

/// A file that passed pre-validation, with its freshly measured size
#[derive(Debug, Clone)]
struct ValidFile {
    path: Utf8PathBuf,
    size: u64,
}

/// Deletes file sets in adaptive batches under the admission gate.
#[derive(Clone)]
pub struct CleanupEngine {
    scanner: Scanner,
    gate: AdmissionGate,
    batch_size: usize,
    progress_steps: usize,
    large_file_threshold: u64,
    metrics: Arc<EngineMetrics>,
}

impl CleanupEngine {
    pub fn new(
        scanner: Scanner,
        gate: AdmissionGate,
        batch_size: usize,
        progress_steps: usize,
        large_file_threshold: u64,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            scanner,
            gate,
            batch_size: batch_size.max(1),
            progress_steps,
            large_file_threshold,
            metrics,
        }
    }

    fn verifier(&self) -> &FileVerifier {
        self.scanner.verifier()
    }

    /// Clean every existing path of `category`, one path at a time.
    ///
    /// Paths are handled in order so the progress stream reads sensibly. A path
    /// that cannot be scanned is recorded as an error and the next path is
    /// tried. Only cancellation stops the category early.
    pub async fn cleanup_category(
        &self,
        category: &Category,
        options: &CleanupOptions,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<CleanupResult, CleanupAborted> {
        let mut total = CleanupResult::new(&category.id, &category.name);
        let emit = |current_file: &str, result: &CleanupResult, percentage: f64| {
            on_progress(CleanupProgress {
                category_id: category.id.clone(),
                category_name: category.name.clone(),
                current_file: current_file.to_string(),
                processed_files: result.processed_files,
                total_files: result.processed_files + result.skipped_files,
                freed_space: result.freed_space,
                percentage,
            })
        };

        emit("", &total, 0.0);

        let mut paths = Vec::with_capacity(category.paths.len());
        for path in &category.paths {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                paths.push(path.clone());
            } else {
                tracing::debug!("Category {}: skipping missing path {}", category.id, path);
            }
        }

        if paths.is_empty() {
            tracing::warn!("Category {} has no existing paths", category.id);
            total.errors.push(format!("No accessible paths for {}", category.name));
            total.finalize();
            emit("", &total, 100.0);
            return Ok(total);
        }

        let count = paths.len();
        for (index, path) in paths.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Self::interrupted(total));
            }

            let band = ProgressBand::for_path(index, count, &total);
            emit(path.as_str(), &total, band.start);

            let files = {
                let _permit = self
                    .gate
                    .acquire_or_cancel(cancel)
                    .await
                    .map_err(|_| Self::interrupted(total.clone()))?;
                self.scanner
                    .scan_path(path, &category.id, options, cancel)
                    .await
            };

            match files {
                Ok(files) if files.is_empty() => {
                    tracing::debug!("Category {}: nothing to clean in {}", category.id, path);
                }
                Ok(files) => {
                    let outcome = self
                        .cleanup_files(
                            files,
                            &category.id,
                            &category.name,
                            options,
                            band.wrap(Arc::clone(&on_progress)),
                            cancel,
                        )
                        .await;
                    match outcome {
                        Ok(result) => total.absorb(result),
                        Err(aborted) => {
                            for partial in aborted.completed {
                                total.absorb(partial);
                            }
                            return Err(CleanupAborted {
                                error: aborted.error,
                                completed: vec![total],
                            });
                        }
                    }
                }
                Err(EngineError::OperationCancelled) => return Err(Self::interrupted(total)),
                Err(e) => {
                    tracing::warn!("Category {}: {}", category.id, e);
                    total.errors.push(e.to_string());
                }
            }

            emit(path.as_str(), &total, band.end);
        }

        total.finalize();
        emit("", &total, 100.0);

        tracing::info!(
            "Category {} finished: {} files, {} bytes freed, {} errors",
            category.id,
            total.processed_files,
            total.freed_space,
            total.errors.len()
        );

        Ok(total)
    }

    /// Delete a set of files belonging to one category.
    ///
    /// Files are re-validated first; whatever no longer exists or must be
    /// skipped is dropped before the count used for progress and
    /// `skipped_files` is fixed.
    pub async fn cleanup_files(
        &self,
        files: Vec<CandidateFile>,
        category_id: &str,
        category_name: &str,
        options: &CleanupOptions,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<CleanupResult, CleanupAborted> {
        let started = Instant::now();
        let mut result = CleanupResult::new(category_id, category_name);

        let valid = match self.validate(files, options, cancel).await {
            Ok(valid) => valid,
            Err(_) => return Err(Self::interrupted(result)),
        };

        if valid.is_empty() {
            tracing::info!("Category {}: {}", category_id, NO_VALID_FILES);
            return Ok(CleanupResult::failed(category_id, category_name, NO_VALID_FILES));
        }

        let valid_count = valid.len();
        let batch_size = batch_size_for(valid_count, self.batch_size);
        let tracker = Arc::new(ProgressTracker::new(
            category_id,
            category_name,
            valid_count,
            self.progress_steps,
            self.large_file_threshold,
            on_progress,
        ));

        tracing::debug!(
            "Category {}: {} valid files in batches of {}",
            category_id,
            valid_count,
            batch_size
        );

        let mut cancelled = false;
        for batch in valid.chunks(batch_size) {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut tasks = Vec::with_capacity(batch.len());
            for file in batch {
                let engine = self.clone();
                let tracker = Arc::clone(&tracker);
                let cancel = cancel.clone();
                let file = file.clone();
                let dry_run = options.dry_run;

                tasks.push(tokio::spawn(async move {
                    let Ok(_permit) = engine.gate.acquire_or_cancel(&cancel).await else {
                        return FileOutcome::Cancelled;
                    };
                    if cancel.is_cancelled() {
                        return FileOutcome::Cancelled;
                    }

                    let outcome = engine.process_file(&file.path, file.size, dry_run).await;
                    let freed = match outcome {
                        FileOutcome::Freed(bytes) => bytes,
                        _ => 0,
                    };
                    tracker.advance(&file.path, file.size, freed);
                    outcome
                }));
            }

            for task in tasks {
                let outcome = task
                    .await
                    .unwrap_or_else(|e| FileOutcome::Failed(EngineError::from(e).to_string()));
                match outcome {
                    FileOutcome::Freed(bytes) => {
                        result.processed_files += 1;
                        result.freed_space += bytes;
                    }
                    FileOutcome::Vanished => {}
                    FileOutcome::Failed(message) => result.errors.push(message),
                    FileOutcome::Cancelled => cancelled = true,
                }
            }

            if cancelled {
                break;
            }
            tokio::task::yield_now().await;
        }

        result.skipped_files = valid_count - result.processed_files;
        result.finalize();

        tracing::info!(
            "Category {}: processed {}/{} files, freed {} bytes in {:.2}s{}",
            category_id,
            result.processed_files,
            valid_count,
            result.freed_space,
            started.elapsed().as_secs_f64(),
            if options.dry_run { " (dry run)" } else { "" }
        );

        if cancelled {
            return Err(Self::interrupted(result));
        }
        Ok(result)
    }

    /// Verify every file concurrently, keeping input order.
    async fn validate(
        &self,
        files: Vec<CandidateFile>,
        options: &CleanupOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<ValidFile>, EngineError> {
        let mut tasks = Vec::with_capacity(files.len());
        for file in files {
            let gate = self.gate.clone();
            let verifier = self.verifier().clone();
            let options = options.clone();
            let cancel = cancel.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = match gate.acquire_or_cancel(&cancel).await {
                    Ok(permit) => permit,
                    Err(e) => return Err(e),
                };
                let status = verifier.verify(&file.path, &options).await;
                if !status.is_deletable_file() {
                    tracing::debug!("Dropping {}: missing or not a regular file", file.path);
                    return Ok(None);
                }
                if verifier.should_exclude(&file.path, &options) {
                    return Ok(None);
                }
                Ok(Some(ValidFile {
                    path: file.path,
                    size: status.size,
                }))
            }));
        }

        let mut valid = Vec::with_capacity(tasks.len());
        let mut first_error = None;
        for task in tasks {
            match task.await {
                Ok(Ok(Some(file))) => valid.push(file),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => tracing::error!("Validation task failed: {}", e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(valid),
        }
    }

    /// Delete (or pretend to delete) one validated file
    pub(crate) async fn process_file(&self, path: &Utf8Path, size: u64, dry_run: bool) -> FileOutcome {
        if dry_run {
            self.metrics.record_freed(size);
            return FileOutcome::Freed(size);
        }

        if let Err(e) = tokio::fs::symlink_metadata(path).await {
            if e.kind() == ErrorKind::NotFound {
                tracing::debug!("{} vanished before deletion", path);
                self.metrics.record_vanished();
                return FileOutcome::Vanished;
            }
        }

        match self.verifier().delete(path).await {
            Ok(freed) => {
                self.metrics.record_freed(freed);
                FileOutcome::Freed(freed)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} vanished during deletion", path);
                self.metrics.record_vanished();
                FileOutcome::Vanished
            }
            Err(e) => {
                tracing::warn!("Delete failed: {}", e);
                self.metrics.record_failed();
                FileOutcome::Failed(e.to_string())
            }
        }
    }

    fn interrupted(mut partial: CleanupResult) -> CleanupAborted {
        partial.errors.push(CANCELLED_MARKER.to_string());
        partial.finalize();
        CleanupAborted::cancelled(vec![partial])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SizeMetric;
    use crate::services::cache::DecisionCache;
    use crate::services::progress::ignore_progress;
    use proptest::prelude::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn engine() -> CleanupEngine {
        let verifier = FileVerifier::new(Arc::new(DecisionCache::new(100)), SizeMetric::Logical);
        let scanner = Scanner::new(
            verifier,
            Arc::new(DecisionCache::new(100)),
            15_000,
            Duration::from_millis(10),
        );
        CleanupEngine::new(
            scanner,
            AdmissionGate::new(4),
            100,
            50,
            20 * 1024 * 1024,
            Arc::new(EngineMetrics::new()),
        )
    }

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_batch_size_examples() {
        assert_eq!(batch_size_for(5, 100), 10);
        assert_eq!(batch_size_for(200, 100), 10);
        assert_eq!(batch_size_for(1000, 100), 50);
        assert_eq!(batch_size_for(10_000, 100), 100);
        assert_eq!(batch_size_for(10_000, 5), 5);
    }

    proptest! {
        #[test]
        fn prop_batch_size_bounds(count in 0usize..100_000, configured in 1usize..1_000) {
            let size = batch_size_for(count, configured);
            prop_assert!(size >= 1);
            prop_assert!(size <= configured);
            prop_assert!(size >= configured.min(MIN_BATCH));
        }
    }

    #[tokio::test]
    async fn test_vanished_file_is_benign() {
        let (_tmp, root) = temp_root();
        let file = root.join("race.bin");
        fs::write(&file, b"abc").unwrap();
        let engine = engine();

        let status = engine.verifier().verify(&file, &CleanupOptions::default()).await;
        assert!(status.is_deletable_file());
        fs::remove_file(&file).unwrap();

        let outcome = engine.process_file(&file, status.size, false).await;
        assert_eq!(outcome, FileOutcome::Vanished);
    }

    #[tokio::test]
    async fn test_delete_error_is_reported() {
        let (_tmp, root) = temp_root();
        let target = root.join("now-a-dir");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner"), b"x").unwrap();

        let outcome = engine().process_file(&target, 1, false).await;
        match outcome {
            FileOutcome::Failed(message) => assert!(message.contains("now-a-dir")),
            other => panic!("expected a failure, got {:?}", other),
        }
        assert!(target.join("inner").exists());
    }

    #[tokio::test]
    async fn test_category_totals_only_grow() {
        let (_tmp, root) = temp_root();
        let mut paths = Vec::new();
        for (dir, count) in [("one", 3usize), ("two", 5)] {
            let path = root.join(dir);
            fs::create_dir(&path).unwrap();
            for i in 0..count {
                fs::write(path.join(format!("{}.bin", i)), b"ab").unwrap();
            }
            paths.push(path);
        }
        let category = Category::new("c", "C", paths);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_progress: ProgressCallback =
            Arc::new(move |p: CleanupProgress| sink.lock().unwrap().push(p));

        let result = engine()
            .cleanup_category(&category, &CleanupOptions::default(), on_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.processed_files, 8);
        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0].total_files <= w[1].total_files));
        assert!(seen.iter().all(|p| p.processed_files <= p.total_files));
        assert_eq!(seen.last().unwrap().total_files, 8);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_file() {
        let (_tmp, root) = temp_root();
        let file = root.join("keep.bin");
        fs::write(&file, b"abcd").unwrap();

        let outcome = engine().process_file(&file, 4, true).await;
        assert_eq!(outcome, FileOutcome::Freed(4));
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_no_valid_files() {
        let (_tmp, root) = temp_root();
        let ghost = CandidateFile::new("c", &root.join("ghost"), 10, true);

        let result = engine()
            .cleanup_files(
                vec![ghost],
                "c",
                "C",
                &CleanupOptions::default(),
                ignore_progress(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors, [NO_VALID_FILES]);
        assert_eq!(result.processed_files, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_keeps_files() {
        let (_tmp, root) = temp_root();
        let file = root.join("a.bin");
        fs::write(&file, b"abc").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let aborted = engine()
            .cleanup_files(
                vec![CandidateFile::new("c", &file, 3, true)],
                "c",
                "C",
                &CleanupOptions::default(),
                ignore_progress(),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(aborted.is_cancelled());
        assert_eq!(aborted.completed.len(), 1);
        assert_eq!(aborted.completed[0].processed_files, 0);
        assert!(file.exists());
    }
}
