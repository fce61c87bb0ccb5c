//! Services module - the scan and cleanup engine.
//!
//! Everything here is async (tokio) and free of any transport or UI concern:
//! categories and options arrive already decoded, results are handed back as
//! plain values.
//!
//! # Components
//!
//! - [`AdmissionGate`]: counting semaphore capping in-flight scan and delete tasks
//! - [`DecisionCache`]: bounded LRU for accessibility and exclusion verdicts
//! - [`FileVerifier`]: existence, size, exclusion rules, and the actual delete
//! - [`Scanner`]: `walkdir` traversals producing candidates or size totals
//! - [`CleanupEngine`]: pre-validation, adaptive batches, throttled progress
//! - [`CleanupOrchestrator`]: the entry point tying the above together
//!
//! # Usage Example
//!
//! ```ignore
//! use sweeper::models::{Category, CleanupOptions, EngineConfig};
//! use sweeper::services::{CleanupOrchestrator, ignore_progress};
//!
//! let orchestrator = CleanupOrchestrator::new(EngineConfig::default());
//! let summary = orchestrator
//!     .scan_categories(categories.clone(), &CleanupOptions::default())
//!     .await?;
//!
//! let results = orchestrator
//!     .cleanup_categories(summary.categories, &CleanupOptions::dry_run(), ignore_progress())
//!     .await?;
//! ```
//!
//! # Cancellation
//!
//! [`CleanupOrchestrator::cancel`] is cooperative. It is observed between
//! categories, before each batch and file, and at timed yield points inside
//! directory walks. Work already started completes, and the run ends with a
//! [`CleanupAborted`] carrying every result finished so far.

pub mod cache;
pub mod cleanup;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod progress;
pub mod scanner;
pub mod verifier;

pub use cache::{DecisionCache, DecisionCaches};
pub use cleanup::{CleanupEngine, NO_VALID_FILES, batch_size_for};
pub use error::{CleanupAborted, EngineError};
pub use gate::AdmissionGate;
pub use orchestrator::{CleanupOrchestrator, PERMISSION_DENIED};
pub use progress::{
    ProgressBand, ProgressCallback, ProgressTracker, emit_interval, ignore_progress, progress_channel,
};
pub use scanner::Scanner;
pub use tokio_util::sync::CancellationToken;
pub use verifier::{FileStatus, FileVerifier};
