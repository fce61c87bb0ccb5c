use super::{CandidateFile, Category, CleanupOptions};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard upper bound on the default admission gate size.
pub const MAX_DEFAULT_CONCURRENCY: usize = 8;

/// How file sizes are measured when scanning and deleting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMetric {
    /// Blocks actually allocated on disk (what a deletion really frees)
    #[default]
    Allocated,
    /// Byte length as reported by the file metadata
    Logical,
}

/// Engine configuration from sweeper.yaml (plus `SWEEPER_*` overrides)
///
/// Every field has a default, so an empty or missing file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admission gate size; `None` means `min(cpu count, 8)`
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_scan_files")]
    pub max_scan_files: usize,

    #[serde(default = "default_yield_interval_ms")]
    pub yield_interval_ms: u64,

    #[serde(default = "default_access_cache_capacity")]
    pub access_cache_capacity: usize,

    #[serde(default = "default_exclusion_cache_capacity")]
    pub exclusion_cache_capacity: usize,

    /// Decision caches are dropped after this many categories
    #[serde(default = "default_cache_clear_interval")]
    pub cache_clear_interval: usize,

    /// Merged scan results larger than this are sorted by size, largest first
    #[serde(default = "default_sort_threshold")]
    pub sort_threshold: usize,

    /// Files above this size always produce a progress event
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,

    /// Roughly how many progress events one file set produces
    #[serde(default = "default_progress_steps")]
    pub progress_steps: usize,

    #[serde(default)]
    pub size_metric: SizeMetric,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            prefix: default_log_prefix(),
            debug: false,
            console: default_console(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            batch_size: default_batch_size(),
            max_scan_files: default_max_scan_files(),
            yield_interval_ms: default_yield_interval_ms(),
            access_cache_capacity: default_access_cache_capacity(),
            exclusion_cache_capacity: default_exclusion_cache_capacity(),
            cache_clear_interval: default_cache_clear_interval(),
            sort_threshold: default_sort_threshold(),
            large_file_threshold: default_large_file_threshold(),
            progress_steps: default_progress_steps(),
            size_metric: SizeMetric::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Effective admission gate size, never zero
    pub fn concurrency(&self) -> usize {
        match self.max_concurrency {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .min(MAX_DEFAULT_CONCURRENCY),
        }
    }

    pub fn yield_interval(&self) -> Duration {
        Duration::from_millis(self.yield_interval_ms)
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_max_scan_files() -> usize {
    15_000
}

fn default_yield_interval_ms() -> u64 {
    10
}

fn default_access_cache_capacity() -> usize {
    1_000
}

fn default_exclusion_cache_capacity() -> usize {
    5_000
}

fn default_cache_clear_interval() -> usize {
    3
}

fn default_sort_threshold() -> usize {
    1_000
}

fn default_large_file_threshold() -> u64 {
    20 * 1024 * 1024
}

fn default_progress_steps() -> usize {
    50
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "sweeper".to_string()
}

fn default_console() -> bool {
    true
}

/// A decoded run request as read by the helper binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunRequest {
    pub categories: Vec<Category>,
    pub options: CleanupOptions,
    /// Specific files to delete, grouped by category id
    pub files: IndexMap<String, Vec<CandidateFile>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_scan_files, 15_000);
        assert_eq!(config.cache_clear_interval, 3);
        assert_eq!(config.large_file_threshold, 20 * 1024 * 1024);
        assert_eq!(config.size_metric, SizeMetric::Allocated);
        assert_eq!(config.yield_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_default_concurrency_is_capped() {
        let config = EngineConfig::default();
        let n = config.concurrency();
        assert!(n >= 1);
        assert!(n <= MAX_DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_explicit_concurrency_never_zero() {
        let config = EngineConfig {
            max_concurrency: Some(0),
            ..EngineConfig::default()
        };
        assert_eq!(config.concurrency(), 1);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: EngineConfig =
            serde_yaml_ng::from_str("batch_size: 25\nsize_metric: logical\n").unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.size_metric, SizeMetric::Logical);
        assert_eq!(config.sort_threshold, 1_000);
        assert_eq!(config.logging.prefix, "sweeper");
    }
}
