use std::fmt;

/// Lifecycle of one engine run.
///
/// A run moves `Idle -> Scanning -> {Cleaning | Cancelled | Failed} -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Scanning,
    Cleaning,
    Cancelled,
    Failed,
}

impl RunPhase {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Scanning)
                | (Scanning, Cleaning)
                | (Scanning, Cancelled)
                | (Scanning, Failed)
                | (Scanning, Idle)
                | (Cleaning, Cancelled)
                | (Cleaning, Failed)
                | (Cleaning, Idle)
                | (Cancelled, Idle)
                | (Failed, Idle)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, RunPhase::Scanning | RunPhase::Cleaning)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Idle => "idle",
            RunPhase::Scanning => "scanning",
            RunPhase::Cleaning => "cleaning",
            RunPhase::Cancelled => "cancelled",
            RunPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Per-category lifecycle inside the `Cleaning` phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryPhase {
    Initializing,
    ProcessingPaths,
    Completed,
    Failed,
}

/// Everything observable about the current run.
///
/// Wrapped in `Arc<RwLock<RunState>>` by [`crate::state::StateManager`]; never
/// mutate it directly.
#[derive(Clone, Debug, Default)]
pub struct RunState {
    pub phase: RunPhase,

    // Category being cleaned
    pub current_category: Option<String>,
    pub category_phase: Option<CategoryPhase>,

    // Progress within the current category
    pub current_file: Option<String>,
    pub percentage: f64,

    // Run totals
    pub categories_total: usize,
    pub categories_done: usize,
    pub categories_failed: usize,
    pub freed_space: u64,
}

impl RunState {
    /// Reset everything except the phase
    pub fn reset_progress(&mut self) {
        self.current_category = None;
        self.category_phase = None;
        self.current_file = None;
        self.percentage = 0.0;
        self.categories_total = 0;
        self.categories_done = 0;
        self.categories_failed = 0;
        self.freed_space = 0;
    }
}
