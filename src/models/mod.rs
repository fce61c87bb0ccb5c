//! Data models for the sweeper engine.
//!
//! - [`Category`] / [`CandidateFile`]: what the caller wants measured or deleted
//! - [`CleanupOptions`] / [`ExclusionRule`]: per-run behavior
//! - [`CleanupProgress`], [`CleanupResult`], [`ScanSummary`]: what flows back
//! - [`CleanupRequest`]: categories only, specific files only, or both
//! - [`EngineConfig`]: tunables loaded by [`ConfigManager`](crate::config::ConfigManager)
//! - [`RunState`]: observable run lifecycle, owned by [`StateManager`](crate::state::StateManager)
//!
//! Categories and files are supplied per invocation and never persisted by the engine.

pub mod category;
pub mod config;
pub mod options;
pub mod report;
pub mod run_state;

pub use category::{CandidateFile, Category};
pub use config::{EngineConfig, LoggingConfig, RunRequest, SizeMetric, MAX_DEFAULT_CONCURRENCY};
pub use options::{CleanupOptions, ExclusionRule, RuleKind};
pub use report::{CleanupProgress, CleanupRequest, CleanupResult, ScanSummary};
pub use run_state::{CategoryPhase, RunPhase, RunState};
