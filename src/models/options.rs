use serde::{Deserialize, Serialize};

/// Per-run knobs supplied by the caller alongside categories or files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanupOptions {
    pub dry_run: bool,
    pub skip_hidden_files: bool,
    /// Entries deeper than this below a scan root are pruned with their subtree.
    pub max_depth: Option<usize>,
    pub exclusion_rules: Vec<ExclusionRule>,
}

impl CleanupOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, rule: ExclusionRule) -> Self {
        self.exclusion_rules.push(rule);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

/// What part of a path an exclusion rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleKind {
    FileName,
    DirectoryName,
    FullPath,
    Extension,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionRule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl ExclusionRule {
    pub fn new(kind: RuleKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}
