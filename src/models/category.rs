use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// A named group of filesystem paths treated as one cleanup unit.
///
/// `size`, `can_access` and `error_message` are only meaningful after a scan
/// pass has filled them in (see
/// [`CleanupOrchestrator::scan_categories`](crate::services::CleanupOrchestrator::scan_categories)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub paths: Vec<Utf8PathBuf>,

    #[serde(default)]
    pub is_selected: bool,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub can_access: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Category {
    /// Create an unselected, unscanned category
    pub fn new(id: impl Into<String>, name: impl Into<String>, paths: Vec<Utf8PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            paths,
            is_selected: false,
            size: 0,
            can_access: false,
            error_message: None,
        }
    }

    /// Builder-style selection toggle
    pub fn selected(mut self, is_selected: bool) -> Self {
        self.is_selected = is_selected;
        self
    }

    /// Whether the category has anything to scan at all
    pub fn has_paths(&self) -> bool {
        !self.paths.is_empty()
    }
}

/// A single file that a scan found and that may be deleted.
///
/// Directories never become candidates; `is_directory` is kept for callers that
/// display mixed listings and is always `false` for scanner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFile {
    pub id: String,
    pub category_id: String,
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,

    #[serde(default)]
    pub is_directory: bool,

    #[serde(default = "default_can_delete")]
    pub can_delete: bool,
}

fn default_can_delete() -> bool {
    true
}

impl CandidateFile {
    /// Build a candidate for `path`, using the path itself as the identifier.
    pub fn new(category_id: impl Into<String>, path: &Utf8Path, size: u64, can_delete: bool) -> Self {
        Self {
            id: path.to_string(),
            category_id: category_id.into(),
            name: path.file_name().unwrap_or(path.as_str()).to_string(),
            path: path.to_path_buf(),
            size,
            is_directory: false,
            can_delete,
        }
    }
}
