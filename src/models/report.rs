use super::{CandidateFile, Category};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot handed to progress callbacks during a cleanup run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupProgress {
    pub category_id: String,
    pub category_name: String,
    pub current_file: String,
    pub processed_files: usize,
    /// Files in the current set. For a category cleaned path by path this is
    /// the running count over the paths validated so far, so it can grow
    /// between events.
    pub total_files: usize,
    pub freed_space: u64,
    /// Always within `0.0..=100.0`
    pub percentage: f64,
}

/// Outcome of cleaning one category or one group of specific files.
///
/// `success` is derived, never set by hand: it holds exactly when no errors
/// were recorded and at least one file was processed. Call
/// [`finalize`](Self::finalize) after mutating counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub category_id: String,
    pub category_name: String,
    pub success: bool,
    pub freed_space: u64,
    pub errors: Vec<String>,
    pub processed_files: usize,
    pub skipped_files: usize,
}

impl CleanupResult {
    /// Empty result for a category, not yet successful
    pub fn new(category_id: impl Into<String>, category_name: impl Into<String>) -> Self {
        Self {
            category_id: category_id.into(),
            category_name: category_name.into(),
            success: false,
            freed_space: 0,
            errors: Vec::new(),
            processed_files: 0,
            skipped_files: 0,
        }
    }

    /// A failed result carrying a single error message
    pub fn failed(
        category_id: impl Into<String>,
        category_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(category_id, category_name);
        result.errors.push(error.into());
        result
    }

    /// Fold another partial result for the same category into this one
    pub fn absorb(&mut self, other: CleanupResult) {
        self.freed_space += other.freed_space;
        self.processed_files += other.processed_files;
        self.skipped_files += other.skipped_files;
        self.errors.extend(other.errors);
        self.finalize();
    }

    /// Recompute `success` from the counters
    pub fn finalize(&mut self) {
        self.success = self.errors.is_empty() && self.processed_files > 0;
    }
}

/// Aggregate output of a scan pass over several categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub categories: Vec<Category>,
    pub total_size: u64,
    pub scan_duration: Duration,
    /// Number of categories with at least one usable path
    pub accessible_paths: usize,
    pub inaccessible_paths: usize,
}

/// The three shapes a specific-files cleanup can be requested in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CleanupRequest {
    CategoriesOnly(Vec<Category>),
    FilesOnly(IndexMap<String, Vec<CandidateFile>>),
    Hybrid {
        categories: Vec<Category>,
        files: IndexMap<String, Vec<CandidateFile>>,
    },
}

impl CleanupRequest {
    /// Pick the request shape from whichever parts are present.
    ///
    /// Returns `None` when both parts are empty.
    pub fn from_parts(
        categories: Vec<Category>,
        files: IndexMap<String, Vec<CandidateFile>>,
    ) -> Option<Self> {
        match (categories.is_empty(), files.is_empty()) {
            (true, true) => None,
            (false, true) => Some(Self::CategoriesOnly(categories)),
            (true, false) => Some(Self::FilesOnly(files)),
            (false, false) => Some(Self::Hybrid { categories, files }),
        }
    }
}
