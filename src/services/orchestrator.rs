use super::cache::DecisionCaches;
use super::cleanup::CleanupEngine;
use super::error::{CleanupAborted, EngineError};
use super::gate::AdmissionGate;
use super::progress::ProgressCallback;
use super::scanner::Scanner;
use super::verifier::FileVerifier;
use crate::metrics::EngineMetrics;
use crate::models::{
    CandidateFile, Category, CategoryPhase, CleanupOptions, CleanupRequest, CleanupResult,
    EngineConfig, RunPhase, ScanSummary,
};
use crate::state::StateManager;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Error recorded on a category none of whose paths can be read and deleted
pub const PERMISSION_DENIED: &str = "Permission denied";

/// Top-level entry point of the engine.
///
/// Owns the admission gate, the decision caches, the current run's
/// cancellation token and the run state. One run (scan or cleanup) executes
/// at a time; a second caller waits for the first to finish. Each run gets a
/// fresh token, so a cancel only ever stops the run it was aimed at.
pub struct CleanupOrchestrator {
    config: EngineConfig,
    gate: AdmissionGate,
    caches: DecisionCaches,
    scanner: Scanner,
    engine: CleanupEngine,
    cancel: std::sync::Mutex<CancellationToken>,
    state: StateManager,
    metrics: Arc<EngineMetrics>,
    run_lock: Mutex<()>,
}

impl CleanupOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let gate = AdmissionGate::new(config.concurrency());
        let caches = DecisionCaches::new(config.access_cache_capacity, config.exclusion_cache_capacity);
        let verifier = FileVerifier::new(Arc::clone(&caches.exclusion), config.size_metric);
        let scanner = Scanner::new(
            verifier,
            Arc::clone(&caches.access),
            config.max_scan_files,
            config.yield_interval(),
        );
        let engine = CleanupEngine::new(
            scanner.clone(),
            gate.clone(),
            config.batch_size,
            config.progress_steps,
            config.large_file_threshold,
            Arc::clone(&metrics),
        );

        tracing::info!(
            "Cleanup engine ready: {} permits, batch size {}, {:?} sizes",
            gate.permits(),
            config.batch_size,
            config.size_metric
        );

        Self {
            config,
            gate,
            caches,
            scanner,
            engine,
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            state: StateManager::new(),
            metrics,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Size of the admission gate
    pub fn concurrency(&self) -> usize {
        self.gate.permits()
    }

    /// Ask the current run to stop and drop cached decisions.
    ///
    /// Work already started finishes; the run then ends with
    /// `OperationCancelled`.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.current_token().cancel();
        self.clear_caches();
    }

    pub fn is_cancelled(&self) -> bool {
        self.current_token().is_cancelled()
    }

    fn current_token(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every deletable file of `category`, one gated scan per path.
    ///
    /// Paths that no longer exist are logged and skipped. Large result sets are
    /// ordered largest first.
    pub async fn files_for_category(
        &self,
        category: &Category,
        options: &CleanupOptions,
    ) -> Result<Vec<CandidateFile>, EngineError> {
        let _run = self.run_lock.lock().await;
        let cancel = self.start_run();

        let mut tasks = Vec::with_capacity(category.paths.len());
        for path in &category.paths {
            let scanner = self.scanner.clone();
            let gate = self.gate.clone();
            let cancel = cancel.clone();
            let options = options.clone();
            let path = path.clone();
            let category_id = category.id.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = match gate.acquire_or_cancel(&cancel).await {
                    Ok(permit) => permit,
                    Err(e) => return Err(e),
                };
                scanner.scan_path(&path, &category_id, &options, &cancel).await
            }));
        }

        let mut files = Vec::new();
        for task in tasks {
            match task.await? {
                Ok(found) => files.extend(found),
                Err(EngineError::PathNotFound(path)) => {
                    tracing::warn!("Category {}: skipping inaccessible path {}", category.id, path);
                }
                Err(e) => return Err(e),
            }
        }

        if files.len() > self.config.sort_threshold {
            files.sort_by(|a, b| b.size.cmp(&a.size));
        }

        tracing::info!("Category {}: {} candidate files", category.id, files.len());
        Ok(files)
    }

    /// Measure every category that has paths, concurrently under the gate.
    ///
    /// A category is accessible when at least one of its paths can be read and
    /// deleted. Inaccessible categories come back with size 0 and an error
    /// message rather than failing the scan.
    pub async fn scan_categories(
        &self,
        categories: Vec<Category>,
        options: &CleanupOptions,
    ) -> Result<ScanSummary, EngineError> {
        let started = Instant::now();
        let _run = self.run_lock.lock().await;
        let cancel = self.start_run();

        let categories: Vec<Category> = categories.into_iter().filter(Category::has_paths).collect();
        self.state.begin_run(categories.len());
        tracing::info!("Scanning {} categories", categories.len());

        let mut tasks = Vec::with_capacity(categories.len());
        for category in categories {
            let scanner = self.scanner.clone();
            let gate = self.gate.clone();
            let cancel = cancel.clone();
            let options = options.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = match gate.acquire_or_cancel(&cancel).await {
                    Ok(permit) => permit,
                    Err(e) => return Err(e),
                };
                measure_category(&scanner, category, &options, &cancel).await
            }));
        }

        let mut scanned = Vec::with_capacity(tasks.len());
        let mut failure = None;
        for task in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(EngineError::from(e)),
            };
            match outcome {
                Ok(category) => scanned.push(category),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            let outcome = if e.is_cancelled() {
                RunPhase::Cancelled
            } else {
                RunPhase::Failed
            };
            tracing::warn!("Scan stopped: {}", e);
            self.state.end_run(outcome);
            return Err(e);
        }

        let accessible_paths = scanned.iter().filter(|c| c.can_access).count();
        let summary = ScanSummary {
            total_size: scanned.iter().map(|c| c.size).sum(),
            inaccessible_paths: scanned.len() - accessible_paths,
            accessible_paths,
            scan_duration: started.elapsed(),
            categories: scanned,
        };

        self.metrics.record_scan();
        self.state.end_run(RunPhase::Idle);

        tracing::info!(
            "Scan finished in {:.2}s: {} bytes across {} accessible categories ({} inaccessible)",
            summary.scan_duration.as_secs_f64(),
            summary.total_size,
            summary.accessible_paths,
            summary.inaccessible_paths
        );

        Ok(summary)
    }

    /// Clean the selected categories one after another.
    ///
    /// Returns one result per selected category in input order. Cancellation
    /// ends the run with `OperationCancelled`, carrying every result finished
    /// before it.
    pub async fn cleanup_categories(
        &self,
        categories: Vec<Category>,
        options: &CleanupOptions,
        on_progress: ProgressCallback,
    ) -> Result<Vec<CleanupResult>, CleanupAborted> {
        let selected: Vec<Category> = categories.into_iter().filter(|c| c.is_selected).collect();
        if selected.is_empty() {
            tracing::info!("No categories selected, nothing to clean");
            return Ok(Vec::new());
        }

        let _run = self.run_lock.lock().await;
        let cancel = self.start_run();
        self.state.begin_run(selected.len());

        let mut results = Vec::with_capacity(selected.len());
        let outcome = self
            .run_categories(&selected, options, &on_progress, &cancel, &mut results)
            .await;
        self.finish_run(outcome, results)
    }

    /// Clean whatever shape of request the caller sent.
    ///
    /// Categories named in the request are cleaned whole whether or not they
    /// were marked selected. File groups are cleaned after them, in map order.
    pub async fn cleanup_with_specific_files(
        &self,
        request: CleanupRequest,
        options: &CleanupOptions,
        on_progress: ProgressCallback,
    ) -> Result<Vec<CleanupResult>, CleanupAborted> {
        let (categories, files) = match request {
            CleanupRequest::CategoriesOnly(categories) => (categories, IndexMap::new()),
            CleanupRequest::FilesOnly(files) => (Vec::new(), files),
            CleanupRequest::Hybrid { categories, files } => (categories, files),
        };

        let categories: Vec<Category> = categories.into_iter().map(|c| c.selected(true)).collect();
        if categories.is_empty() && files.is_empty() {
            return Ok(Vec::new());
        }

        let names: HashMap<String, String> = categories
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect();

        let _run = self.run_lock.lock().await;
        let cancel = self.start_run();
        self.state.begin_run(categories.len() + files.len());

        tracing::info!(
            "Specific cleanup: {} categories, {} file groups",
            categories.len(),
            files.len()
        );

        let mut results = Vec::with_capacity(categories.len() + files.len());
        let mut outcome = self
            .run_categories(&categories, options, &on_progress, &cancel, &mut results)
            .await;
        if outcome.is_ok() {
            outcome = self
                .run_file_groups(files, &names, options, &on_progress, &cancel, &mut results)
                .await;
        }
        self.finish_run(outcome, results)
    }

    async fn run_categories(
        &self,
        categories: &[Category],
        options: &CleanupOptions,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
        results: &mut Vec<CleanupResult>,
    ) -> Result<(), CleanupAborted> {
        for category in categories {
            if cancel.is_cancelled() {
                return Err(CleanupAborted::cancelled(Vec::new()));
            }

            let started = Instant::now();
            self.state.start_category(&category.id);
            self.state.set_category_phase(CategoryPhase::ProcessingPaths);

            let result = match self
                .engine
                .cleanup_category(category, options, self.observed(on_progress), cancel)
                .await
            {
                Ok(result) => result,
                Err(aborted) if aborted.is_cancelled() => return Err(aborted),
                Err(aborted) => {
                    tracing::error!("Category {} failed: {}", category.id, aborted);
                    CleanupResult::failed(&category.id, &category.name, aborted.to_string())
                }
            };

            self.settle(result, started, results);
        }
        Ok(())
    }

    async fn run_file_groups(
        &self,
        groups: IndexMap<String, Vec<CandidateFile>>,
        names: &HashMap<String, String>,
        options: &CleanupOptions,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
        results: &mut Vec<CleanupResult>,
    ) -> Result<(), CleanupAborted> {
        for (category_id, files) in groups {
            if cancel.is_cancelled() {
                return Err(CleanupAborted::cancelled(Vec::new()));
            }

            let name = names.get(&category_id).cloned().unwrap_or_else(|| category_id.clone());
            let started = Instant::now();
            self.state.start_category(&category_id);
            self.state.set_category_phase(CategoryPhase::ProcessingPaths);

            let result = match self
                .engine
                .cleanup_files(files, &category_id, &name, options, self.observed(on_progress), cancel)
                .await
            {
                Ok(result) => result,
                Err(aborted) if aborted.is_cancelled() => return Err(aborted),
                Err(aborted) => {
                    tracing::error!("File group {} failed: {}", category_id, aborted);
                    CleanupResult::failed(&category_id, &name, aborted.to_string())
                }
            };

            self.settle(result, started, results);
        }
        Ok(())
    }

    /// Book a finished unit and drop the caches every `cache_clear_interval` units
    fn settle(&self, result: CleanupResult, started: Instant, results: &mut Vec<CleanupResult>) {
        self.metrics.record_category();
        self.metrics.record_cleanup_time(started.elapsed());
        self.state.finish_category(&result);
        results.push(result);

        if results.len() % self.config.cache_clear_interval.max(1) == 0 {
            self.clear_caches();
        }
    }

    fn finish_run(
        &self,
        outcome: Result<(), CleanupAborted>,
        results: Vec<CleanupResult>,
    ) -> Result<Vec<CleanupResult>, CleanupAborted> {
        match outcome {
            Ok(()) => {
                self.state.end_run(RunPhase::Idle);
                tracing::info!(
                    "Cleanup finished: {} results, {} bytes freed",
                    results.len(),
                    results.iter().map(|r| r.freed_space).sum::<u64>()
                );
                Ok(results)
            }
            Err(aborted) => {
                let phase = if aborted.is_cancelled() {
                    RunPhase::Cancelled
                } else {
                    RunPhase::Failed
                };
                self.state.end_run(phase);
                tracing::info!("Cleanup stopped after {} results: {}", results.len(), aborted);
                Err(aborted.prepend(results))
            }
        }
    }

    /// Give the new run a fresh cancellation token and forget cached
    /// decisions. Exclusion verdicts depend on the run's rules, and paths may
    /// have appeared or changed permissions since the last run.
    fn start_run(&self) -> CancellationToken {
        self.caches.access.clear();
        self.caches.exclusion.clear();
        let token = CancellationToken::new();
        *self.current_token() = token.clone();
        token
    }

    fn clear_caches(&self) {
        self.caches.clear();
        self.metrics.record_cache_clear();
        self.state.caches_cleared();
    }

    /// Forward progress to the caller after recording it in the run state
    fn observed(&self, on_progress: &ProgressCallback) -> ProgressCallback {
        let state = self.state.clone();
        let inner = Arc::clone(on_progress);
        Arc::new(move |progress| {
            state.record_progress(&progress);
            inner(progress);
        })
    }
}

/// Decide accessibility and size for one category
async fn measure_category(
    scanner: &Scanner,
    mut category: Category,
    options: &CleanupOptions,
    cancel: &CancellationToken,
) -> Result<Category, EngineError> {
    let mut accessible = false;
    for path in &category.paths {
        if scanner.is_accessible(path).await && scanner.verifier().verify(path, options).await.can_delete {
            accessible = true;
            break;
        }
    }

    category.can_access = accessible;
    if accessible {
        category.size = scanner.directory_size(&category.paths, options, cancel).await?;
        category.error_message = None;
        tracing::debug!("Category {}: {} bytes", category.id, category.size);
    } else {
        category.size = 0;
        category.error_message = Some(PERMISSION_DENIED.to_string());
        tracing::warn!("Category {}: no readable and deletable path", category.id);
    }
    Ok(category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SizeMetric;
    use crate::services::progress::ignore_progress;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    fn orchestrator() -> CleanupOrchestrator {
        CleanupOrchestrator::new(EngineConfig {
            max_concurrency: Some(4),
            size_metric: SizeMetric::Logical,
            ..EngineConfig::default()
        })
    }

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, root)
    }

    #[tokio::test]
    async fn test_unselected_categories_are_ignored() {
        let (_tmp, root) = temp_root();
        fs::write(root.join("a"), b"abc").unwrap();
        let category = Category::new("c", "C", vec![root.clone()]).selected(false);

        let results = orchestrator()
            .cleanup_categories(vec![category], &CleanupOptions::default(), ignore_progress())
            .await
            .unwrap();

        assert!(results.is_empty());
        assert!(root.join("a").exists());
    }

    #[tokio::test]
    async fn test_missing_path_category_is_denied() {
        let (_tmp, root) = temp_root();
        let category = Category::new("ghost", "Ghost", vec![root.join("nope")]);

        let summary = orchestrator()
            .scan_categories(vec![category], &CleanupOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.accessible_paths, 0);
        assert_eq!(summary.inaccessible_paths, 1);
        assert_eq!(summary.categories[0].error_message.as_deref(), Some(PERMISSION_DENIED));
    }

    #[tokio::test]
    async fn test_cancel_clears_caches_and_state_returns_idle() {
        let (_tmp, root) = temp_root();
        fs::write(root.join("a"), b"abc").unwrap();
        let orchestrator = orchestrator();
        let category = Category::new("c", "C", vec![root.clone()]);

        orchestrator
            .files_for_category(&category, &CleanupOptions::default())
            .await
            .unwrap();
        assert!(!orchestrator.caches.access.is_empty());

        orchestrator.cancel();
        assert!(orchestrator.is_cancelled());
        assert!(orchestrator.caches.access.is_empty());
        assert_eq!(orchestrator.state().phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_new_run_clears_previous_cancel() {
        let (_tmp, root) = temp_root();
        fs::write(root.join("a"), b"abc").unwrap();
        let orchestrator = orchestrator();
        orchestrator.cancel();

        let files = orchestrator
            .files_for_category(&Category::new("c", "C", vec![root]), &CleanupOptions::default())
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert!(!orchestrator.is_cancelled());
    }

    #[tokio::test]
    async fn test_path_created_after_scan_is_cleaned() {
        let (_tmp, root) = temp_root();
        let shots = root.join("shots");
        let orchestrator = orchestrator();
        let category = Category::new("shots", "Shots", vec![shots.clone()]).selected(true);

        let summary = orchestrator
            .scan_categories(vec![category.clone()], &CleanupOptions::default())
            .await
            .unwrap();
        assert!(!summary.categories[0].can_access);

        fs::create_dir(&shots).unwrap();
        fs::write(shots.join("a.png"), b"png").unwrap();

        let results = orchestrator
            .cleanup_categories(vec![category], &CleanupOptions::default(), ignore_progress())
            .await
            .unwrap();

        assert!(results[0].success, "{:?}", results[0].errors);
        assert_eq!(results[0].processed_files, 1);
        assert!(!shots.join("a.png").exists());
    }
}
