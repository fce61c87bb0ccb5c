use super::cache::DecisionCache;
use super::error::EngineError;
use crate::models::{CleanupOptions, ExclusionRule, RuleKind, SizeMetric};
use camino::Utf8Path;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

/// What the verifier knows about one path right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStatus {
    pub exists: bool,
    pub can_delete: bool,
    pub size: u64,
    /// Directories, special files, unreadable entries, and (when requested)
    /// hidden files are never deleted
    pub should_skip: bool,
}

impl FileStatus {
    pub fn missing() -> Self {
        Self::default()
    }

    /// Exists, is a regular file, and nothing says to leave it alone
    pub fn is_deletable_file(&self) -> bool {
        self.exists && !self.should_skip
    }
}

/// Per-path authority for existence, size, exclusion, and deletion.
///
/// Symlinks are never followed: a link is inspected (and skipped) as itself.
#[derive(Debug, Clone)]
pub struct FileVerifier {
    exclusion_cache: Arc<DecisionCache<bool>>,
    size_metric: SizeMetric,
    // Compiled regex rules; `None` marks a pattern that failed to compile
    patterns: Arc<Mutex<HashMap<(String, bool), Option<Regex>>>>,
}

impl FileVerifier {
    pub fn new(exclusion_cache: Arc<DecisionCache<bool>>, size_metric: SizeMetric) -> Self {
        Self {
            exclusion_cache,
            size_metric,
            patterns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn size_metric(&self) -> SizeMetric {
        self.size_metric
    }

    /// Size of a file according to the configured metric
    pub fn measure(&self, metadata: &Metadata) -> u64 {
        match self.size_metric {
            SizeMetric::Logical => metadata.len(),
            SizeMetric::Allocated => allocated_size(metadata),
        }
    }

    pub async fn verify(&self, path: &Utf8Path, options: &CleanupOptions) -> FileStatus {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return FileStatus::missing(),
            Err(e) => {
                tracing::debug!("Cannot inspect {}: {}", path, e);
                return FileStatus {
                    exists: true,
                    should_skip: true,
                    ..FileStatus::default()
                };
            }
        };

        let should_skip =
            !metadata.is_file() || (options.skip_hidden_files && is_hidden(path));

        FileStatus {
            exists: true,
            can_delete: !metadata.permissions().readonly(),
            size: self.measure(&metadata),
            should_skip,
        }
    }

    /// Whether any exclusion rule matches `path`. Rules are tried in order
    /// and the first match wins. Verdicts are cached per path.
    pub fn should_exclude(&self, path: &Utf8Path, options: &CleanupOptions) -> bool {
        if options.exclusion_rules.is_empty() {
            return false;
        }
        if let Some(verdict) = self.exclusion_cache.get(path) {
            return verdict;
        }

        let verdict = options
            .exclusion_rules
            .iter()
            .find(|rule| self.rule_matches(rule, path))
            .inspect(|rule| {
                tracing::debug!("Excluding {} ({:?} rule '{}')", path, rule.kind, rule.pattern)
            })
            .is_some();

        self.exclusion_cache.set(path, verdict);
        verdict
    }

    fn rule_matches(&self, rule: &ExclusionRule, path: &Utf8Path) -> bool {
        let cs = rule.case_sensitive;
        match rule.kind {
            RuleKind::FileName => path
                .file_name()
                .is_some_and(|name| contains(name, &rule.pattern, cs)),
            RuleKind::DirectoryName => path
                .parent()
                .is_some_and(|dir| contains(dir.as_str(), &rule.pattern, cs)),
            RuleKind::FullPath => contains(path.as_str(), &rule.pattern, cs),
            RuleKind::Extension => path.extension().is_some_and(|ext| {
                contains(ext, rule.pattern.trim_start_matches('.'), cs)
            }),
            RuleKind::Regex => match self.compiled(&rule.pattern, cs) {
                Some(regex) => regex.is_match(path.as_str()),
                None => contains(path.as_str(), &rule.pattern, cs),
            },
        }
    }

    fn compiled(&self, pattern: &str, case_sensitive: bool) -> Option<Regex> {
        let mut patterns = self
            .patterns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        patterns
            .entry((pattern.to_string(), case_sensitive))
            .or_insert_with(|| {
                RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .inspect_err(|e| {
                        tracing::warn!("Invalid exclusion regex '{}', matching literally: {}", pattern, e)
                    })
                    .ok()
            })
            .clone()
    }

    /// Remove a file and report how much space it occupied.
    ///
    /// A file that is already gone surfaces as an `Io` error whose
    /// [`EngineError::is_not_found`] is true; callers treat that as benign.
    pub async fn delete(&self, path: &Utf8Path) -> Result<u64, EngineError> {
        let metadata = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;
        let size = self.measure(&metadata);

        tokio::fs::remove_file(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;

        tracing::debug!("Deleted {} ({} bytes)", path, size);
        Ok(size)
    }
}

fn is_hidden(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('.'))
}

fn contains(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.contains(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

#[cfg(unix)]
fn allocated_size(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn allocated_size(metadata: &Metadata) -> u64 {
    metadata.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    fn verifier(metric: SizeMetric) -> FileVerifier {
        FileVerifier::new(Arc::new(DecisionCache::new(100)), metric)
    }

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, root)
    }

    fn excluded(rule: ExclusionRule, path: &str) -> bool {
        let options = CleanupOptions::default().with_rule(rule);
        verifier(SizeMetric::Logical).should_exclude(Utf8Path::new(path), &options)
    }

    #[tokio::test]
    async fn test_verify_regular_file() {
        let (_tmp, root) = temp_root();
        let file = root.join("a.bin");
        fs::write(&file, vec![0u8; 123]).unwrap();

        let status = verifier(SizeMetric::Logical)
            .verify(&file, &CleanupOptions::default())
            .await;

        assert!(status.exists);
        assert!(status.can_delete);
        assert!(!status.should_skip);
        assert_eq!(status.size, 123);
    }

    #[tokio::test]
    async fn test_verify_directory_is_skipped() {
        let (_tmp, root) = temp_root();
        let status = verifier(SizeMetric::Logical)
            .verify(&root, &CleanupOptions::default())
            .await;
        assert!(status.exists);
        assert!(status.should_skip);
    }

    #[tokio::test]
    async fn test_verify_missing() {
        let (_tmp, root) = temp_root();
        let status = verifier(SizeMetric::Logical)
            .verify(&root.join("nope"), &CleanupOptions::default())
            .await;
        assert_eq!(status, FileStatus::missing());
    }

    #[tokio::test]
    async fn test_verify_hidden_when_requested() {
        let (_tmp, root) = temp_root();
        let file = root.join(".secret");
        fs::write(&file, b"x").unwrap();
        let options = CleanupOptions {
            skip_hidden_files: true,
            ..CleanupOptions::default()
        };

        let status = verifier(SizeMetric::Logical).verify(&file, &options).await;
        assert!(status.should_skip);
    }

    #[tokio::test]
    async fn test_readonly_file_cannot_delete() {
        let (_tmp, root) = temp_root();
        let file = root.join("ro.txt");
        fs::write(&file, b"x").unwrap();
        let mut perms = fs::metadata(&file).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&file, perms).unwrap();

        let status = verifier(SizeMetric::Logical)
            .verify(&file, &CleanupOptions::default())
            .await;
        assert!(!status.can_delete);
    }

    #[test]
    fn test_extension_rule_case_folding() {
        let rule = ExclusionRule::new(RuleKind::Extension, "tmp");
        assert!(excluded(rule.clone(), "/d/a.tmp"));
        assert!(excluded(rule.clone(), "/d/b.TMP"));
        assert!(excluded(rule.clone(), "/d/c.Tmp"));
        assert!(!excluded(rule, "/d/tmp.txt"));
    }

    #[test]
    fn test_case_sensitive_rule() {
        let rule = ExclusionRule::new(RuleKind::FileName, "Report").case_sensitive();
        assert!(excluded(rule.clone(), "/d/Report.pdf"));
        assert!(!excluded(rule, "/d/report.pdf"));
    }

    #[test]
    fn test_directory_and_full_path_rules() {
        assert!(excluded(ExclusionRule::new(RuleKind::DirectoryName, "keep"), "/home/Keep/x.log"));
        assert!(!excluded(ExclusionRule::new(RuleKind::DirectoryName, "keep"), "/home/a/keep.log"));
        assert!(excluded(ExclusionRule::new(RuleKind::FullPath, "/home/a/"), "/home/a/x.log"));
    }

    #[test]
    fn test_regex_rule() {
        let rule = ExclusionRule::new(RuleKind::Regex, r"\.log\.\d+$");
        assert!(excluded(rule.clone(), "/var/app.LOG.3"));
        assert!(!excluded(rule, "/var/app.log"));
    }

    #[test]
    fn test_invalid_regex_falls_back_to_substring() {
        let rule = ExclusionRule::new(RuleKind::Regex, "cache[");
        assert!(excluded(rule.clone(), "/x/Cache[1]/file"));
        assert!(!excluded(rule, "/x/cache/file"));
    }

    #[test]
    fn test_first_matching_rule_wins_and_is_cached() {
        let cache = Arc::new(DecisionCache::new(10));
        let verifier = FileVerifier::new(Arc::clone(&cache), SizeMetric::Logical);
        let options = CleanupOptions::default()
            .with_rule(ExclusionRule::new(RuleKind::FileName, "nomatch"))
            .with_rule(ExclusionRule::new(RuleKind::Extension, "log"));

        assert!(verifier.should_exclude(Utf8Path::new("/a/b.log"), &options));
        assert_eq!(cache.get(Utf8Path::new("/a/b.log")), Some(true));
    }

    #[test]
    fn test_no_rules_skips_cache() {
        let cache = Arc::new(DecisionCache::new(10));
        let verifier = FileVerifier::new(Arc::clone(&cache), SizeMetric::Logical);
        assert!(!verifier.should_exclude(Utf8Path::new("/a"), &CleanupOptions::default()));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_returns_size() {
        let (_tmp, root) = temp_root();
        let file = root.join("gone.bin");
        fs::write(&file, vec![1u8; 64]).unwrap();

        let freed = verifier(SizeMetric::Logical).delete(&file).await.unwrap();
        assert_eq!(freed, 64);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_tmp, root) = temp_root();
        let err = verifier(SizeMetric::Logical)
            .delete(&root.join("never"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
