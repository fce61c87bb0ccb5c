// Sweeper - bounded-concurrency disk scanning and cleanup engine
//
// This is the library crate containing the engine, its data model and the
// ambient configuration/logging layers. The binary crate (main.rs) is a local
// harness that drives the engine from YAML run requests.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::EngineMetrics;
pub use models::{
    CandidateFile, Category, CleanupOptions, CleanupProgress, CleanupRequest, CleanupResult,
    EngineConfig, ExclusionRule, RuleKind, ScanSummary,
};
pub use services::{CleanupAborted, CleanupOrchestrator, EngineError, ProgressCallback};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
