use super::cache::DecisionCache;
use super::error::EngineError;
use super::verifier::{FileStatus, FileVerifier};
use crate::models::{CandidateFile, CleanupOptions};
use camino::{Utf8Path, Utf8PathBuf};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

/// Walks directory trees and turns what it finds into candidates or totals.
///
/// Traversal never follows symlinks and yields back to the runtime every
/// `yield_interval`, checking for cancellation each time.
#[derive(Debug, Clone)]
pub struct Scanner {
    verifier: FileVerifier,
    access_cache: Arc<DecisionCache<bool>>,
    max_files: usize,
    yield_interval: Duration,
}

impl Scanner {
    pub fn new(
        verifier: FileVerifier,
        access_cache: Arc<DecisionCache<bool>>,
        max_files: usize,
        yield_interval: Duration,
    ) -> Self {
        Self {
            verifier,
            access_cache,
            max_files,
            yield_interval,
        }
    }

    pub fn verifier(&self) -> &FileVerifier {
        &self.verifier
    }

    /// A path is accessible when it exists and can be read (listed, for a
    /// directory). Answers are cached per path.
    pub async fn is_accessible(&self, path: &Utf8Path) -> bool {
        if let Some(accessible) = self.access_cache.get(path) {
            return accessible;
        }

        let accessible = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::read_dir(path).await.is_ok(),
            Ok(_) => tokio::fs::File::open(path).await.is_ok(),
            Err(_) => false,
        };

        if !accessible {
            tracing::debug!("Path not accessible: {}", path);
        }
        self.access_cache.set(path, accessible);
        accessible
    }

    /// Collect every deletable file under `path`.
    ///
    /// Stops quietly once `max_files` candidates have been collected.
    pub async fn scan_path(
        &self,
        path: &Utf8Path,
        category_id: &str,
        options: &CleanupOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateFile>, EngineError> {
        if !self.is_accessible(path).await {
            return Err(EngineError::PathNotFound(path.to_path_buf()));
        }

        let started = Instant::now();
        let mut files = Vec::new();
        let mut truncated = false;

        self.walk(path, options, cancel, |file, status| {
            if files.len() >= self.max_files {
                truncated = true;
                return ControlFlow::Break(());
            }
            files.push(CandidateFile::new(category_id, file, status.size, status.can_delete));
            ControlFlow::Continue(())
        })
        .await?;

        if truncated {
            tracing::info!(
                "Scan of {} stopped at the {} file limit",
                path,
                self.max_files
            );
        }
        tracing::debug!(
            "Scanned {}: {} files in {:.1}ms",
            path,
            files.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );

        Ok(files)
    }

    /// Total size of every deletable file under `paths`.
    ///
    /// Inaccessible paths contribute nothing; only cancellation is an error.
    pub async fn directory_size(
        &self,
        paths: &[Utf8PathBuf],
        options: &CleanupOptions,
        cancel: &CancellationToken,
    ) -> Result<u64, EngineError> {
        let mut total = 0u64;
        for path in paths {
            if !self.is_accessible(path).await {
                continue;
            }
            self.walk(path, options, cancel, |_, status| {
                total += status.size;
                ControlFlow::Continue(())
            })
            .await?;
        }
        Ok(total)
    }

    /// Depth-first walk calling `visit` for every file that survives
    /// verification, hidden-file policy, depth limit, and exclusion rules.
    ///
    /// A root naming a single file is visited as itself.
    async fn walk<F>(
        &self,
        root: &Utf8Path,
        options: &CleanupOptions,
        cancel: &CancellationToken,
        mut visit: F,
    ) -> Result<(), EngineError>
    where
        F: FnMut(&Utf8Path, FileStatus) -> ControlFlow<()>,
    {
        if cancel.is_cancelled() {
            return Err(EngineError::OperationCancelled);
        }

        let skip_hidden = options.skip_hidden_files;
        let entries = WalkDir::new(root)
            .follow_links(false)
            .max_depth(options.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0 || !(skip_hidden && is_hidden_entry(entry))
            });

        let mut last_yield = Instant::now();
        for entry in entries {
            if last_yield.elapsed() >= self.yield_interval {
                tokio::task::yield_now().await;
                if cancel.is_cancelled() {
                    tracing::debug!("Walk of {} cancelled", root);
                    return Err(EngineError::OperationCancelled);
                }
                last_yield = Instant::now();
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry under {}: {}", root, e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(path) => path,
                Err(path) => {
                    tracing::debug!("Skipping non UTF-8 path: {}", path.display());
                    continue;
                }
            };

            if let Some(status) = self.admit(&path, options).await {
                if visit(&path, status).is_break() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn admit(&self, path: &Utf8Path, options: &CleanupOptions) -> Option<FileStatus> {
        let status = self.verifier.verify(path, options).await;
        if !status.is_deletable_file() || status.size == 0 {
            return None;
        }
        if self.verifier.should_exclude(path, options) {
            return None;
        }
        Some(status)
    }
}

fn is_hidden_entry(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExclusionRule, RuleKind, SizeMetric};
    use std::fs;
    use tempfile::TempDir;

    fn scanner(max_files: usize) -> Scanner {
        let verifier = FileVerifier::new(Arc::new(DecisionCache::new(1000)), SizeMetric::Logical);
        Scanner::new(
            verifier,
            Arc::new(DecisionCache::new(100)),
            max_files,
            Duration::from_millis(10),
        )
    }

    fn tree() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("top.txt"), b"12345").unwrap();
        fs::write(root.join("a/one.log"), b"1").unwrap();
        fs::write(root.join("a/b/two.tmp"), b"22").unwrap();
        fs::write(root.join("a/b/c/three.TMP"), b"333").unwrap();
        fs::write(root.join(".hidden/secret"), b"4444").unwrap();
        fs::write(root.join(".dotfile"), b"55555").unwrap();
        fs::write(root.join("empty"), b"").unwrap();
        (temp_dir, root)
    }

    fn names(files: &[CandidateFile]) -> Vec<String> {
        let mut names: Vec<_> = files.iter().map(|f| f.name.clone()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_scan_finds_all_non_empty_files() {
        let (_tmp, root) = tree();
        let files = scanner(100)
            .scan_path(&root, "c", &CleanupOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            names(&files),
            [".dotfile", "one.log", "secret", "three.TMP", "top.txt", "two.tmp"]
        );
        assert!(files.iter().all(|f| !f.is_directory && f.category_id == "c"));
    }

    #[tokio::test]
    async fn test_skip_hidden_prunes_hidden_dirs() {
        let (_tmp, root) = tree();
        let options = CleanupOptions {
            skip_hidden_files: true,
            ..CleanupOptions::default()
        };
        let files = scanner(100)
            .scan_path(&root, "c", &options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(names(&files), ["one.log", "three.TMP", "top.txt", "two.tmp"]);
    }

    #[tokio::test]
    async fn test_max_depth_prunes_subtrees() {
        let (_tmp, root) = tree();
        let options = CleanupOptions::default().with_max_depth(2);
        let files = scanner(100)
            .scan_path(&root, "c", &options, &CancellationToken::new())
            .await
            .unwrap();

        for file in &files {
            let depth = file.path.strip_prefix(&root).unwrap().components().count();
            assert!(depth <= 2, "{} is too deep", file.path);
        }
        assert!(names(&files).contains(&"one.log".to_string()));
        assert!(!names(&files).contains(&"two.tmp".to_string()));
    }

    #[tokio::test]
    async fn test_extension_exclusion() {
        let (_tmp, root) = tree();
        let options =
            CleanupOptions::default().with_rule(ExclusionRule::new(RuleKind::Extension, "tmp"));
        let files = scanner(100)
            .scan_path(&root, "c", &options, &CancellationToken::new())
            .await
            .unwrap();

        assert!(files.iter().all(|f| !f.name.to_lowercase().ends_with(".tmp")));
        assert_eq!(files.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let (_tmp, root) = tree();
        let err = scanner(100)
            .scan_path(&root.join("nope"), "c", &CleanupOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PathNotFound(_)));
    }

    #[tokio::test]
    async fn test_file_cap_truncates() {
        let (_tmp, root) = tree();
        let files = scanner(2)
            .scan_path(&root, "c", &CleanupOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_walk() {
        let (_tmp, root) = tree();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scanner(100)
            .scan_path(&root, "c", &CleanupOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_directory_size_skips_missing() {
        let (_tmp, root) = tree();
        let total = scanner(100)
            .directory_size(
                &[root.join("a"), root.join("missing")],
                &CleanupOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1 + 2 + 3);
    }

    #[tokio::test]
    async fn test_single_file_root() {
        let (_tmp, root) = tree();
        let files = scanner(100)
            .scan_path(&root.join("top.txt"), "c", &CleanupOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(names(&files), ["top.txt"]);
    }

    #[tokio::test]
    async fn test_single_file_root_honors_file_cap() {
        let (_tmp, root) = tree();
        let files = scanner(0)
            .scan_path(&root.join("top.txt"), "c", &CleanupOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_hidden_root_is_still_walked() {
        let (_tmp, root) = tree();
        let options = CleanupOptions {
            skip_hidden_files: true,
            ..CleanupOptions::default()
        };
        let files = scanner(100)
            .scan_path(&root.join(".hidden"), "c", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(names(&files), ["secret"]);
    }

    #[tokio::test]
    async fn test_accessibility_is_cached() {
        let (_tmp, root) = tree();
        let scanner = scanner(100);
        let dir = root.join("a");
        assert!(scanner.is_accessible(&dir).await);
        fs::remove_dir_all(&dir).unwrap();
        assert!(scanner.is_accessible(&dir).await);
        assert!(!scanner.is_accessible(&root.join("never")).await);
    }
}
