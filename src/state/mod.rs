// State management module
//
// Wraps RunState with thread-safe access using Arc<RwLock<T>> and emits change
// events so callers can observe a run without polling.

use crate::models::{CategoryPhase, CleanupProgress, CleanupResult, RunPhase, RunState};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Change events emitted when run state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The run moved to a new phase
    PhaseChanged { from: RunPhase, to: RunPhase },

    /// A category started cleaning
    CategoryStarted {
        category_id: String,
        index: usize,
        total: usize,
    },

    /// The current category moved to a new phase
    CategoryPhaseChanged {
        category_id: String,
        phase: CategoryPhase,
    },

    /// Progress within the current category
    ProgressUpdated {
        category_id: String,
        percentage: f64,
        current_file: Option<String>,
    },

    /// A category produced its result
    CategoryFinished {
        category_id: String,
        success: bool,
        freed_space: u64,
    },

    /// Decision caches were dropped
    CachesCleared,

    /// State has been reset
    StateReset,
}

/// Thread-safe run state with event emission
///
/// The orchestrator is the only writer; everybody else reads snapshots or
/// subscribes to [`StateChange`] events.
pub struct StateManager {
    state: Arc<RwLock<RunState>>,
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with a broadcast buffer of 256 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(RunState::default())),
            state_tx,
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, RunState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, RunState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> RunState {
        self.read_guard().clone()
    }

    /// Execute a function with read access to the state
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RunState) -> R,
    {
        let state = self.read_guard();
        f(&state)
    }

    /// Current run phase
    pub fn phase(&self) -> RunPhase {
        self.read(|s| s.phase)
    }

    /// Apply `update_fn`, detect what changed, and broadcast it
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut RunState),
    {
        let changes = {
            let mut state = self.write_guard();
            let old_state = state.clone();
            update_fn(&mut state);
            Self::detect_changes(&old_state, &state)
        };

        for change in &changes {
            // Nobody listening is fine
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(old: &RunState, new: &RunState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.phase != new.phase {
            changes.push(StateChange::PhaseChanged {
                from: old.phase,
                to: new.phase,
            });
        }

        if let Some(category_id) = &new.current_category {
            if old.current_category != new.current_category {
                changes.push(StateChange::CategoryStarted {
                    category_id: category_id.clone(),
                    index: new.categories_done,
                    total: new.categories_total,
                });
            }

            if old.category_phase != new.category_phase {
                if let Some(phase) = new.category_phase {
                    changes.push(StateChange::CategoryPhaseChanged {
                        category_id: category_id.clone(),
                        phase,
                    });
                }
            }

            if old.percentage != new.percentage || old.current_file != new.current_file {
                changes.push(StateChange::ProgressUpdated {
                    category_id: category_id.clone(),
                    percentage: new.percentage,
                    current_file: new.current_file.clone(),
                });
            }
        }

        changes
    }

    /// Move to `next` if the transition is legal.
    ///
    /// Illegal transitions are logged and ignored.
    pub fn transition(&self, next: RunPhase) -> Vec<StateChange> {
        let current = self.phase();
        if !current.can_transition_to(next) {
            tracing::warn!("Ignoring illegal run transition {} -> {}", current, next);
            return Vec::new();
        }
        self.update(|state| state.phase = next)
    }

    /// Enter `Scanning` for a new run over `total_categories`
    pub fn begin_run(&self, total_categories: usize) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.reset_progress();
            state.categories_total = total_categories;
        });
        changes.extend(self.transition(RunPhase::Scanning));
        changes
    }

    /// Finish the run in `outcome` and settle back to `Idle`
    pub fn end_run(&self, outcome: RunPhase) -> Vec<StateChange> {
        let mut changes = Vec::new();
        if outcome != RunPhase::Idle && self.phase() != outcome {
            changes.extend(self.transition(outcome));
        }
        changes.extend(self.transition(RunPhase::Idle));
        changes
    }

    pub fn start_category(&self, category_id: &str) -> Vec<StateChange> {
        let mut changes = Vec::new();
        if self.phase() == RunPhase::Scanning {
            changes.extend(self.transition(RunPhase::Cleaning));
        }
        changes.extend(self.update(|state| {
            state.current_category = Some(category_id.to_string());
            state.category_phase = Some(CategoryPhase::Initializing);
            state.current_file = None;
            state.percentage = 0.0;
        }));
        changes
    }

    pub fn set_category_phase(&self, phase: CategoryPhase) -> Vec<StateChange> {
        self.update(|state| state.category_phase = Some(phase))
    }

    pub fn record_progress(&self, progress: &CleanupProgress) -> Vec<StateChange> {
        self.update(|state| {
            state.percentage = progress.percentage;
            if !progress.current_file.is_empty() {
                state.current_file = Some(progress.current_file.clone());
            }
        })
    }

    /// Record a category result and emit `CategoryFinished`
    pub fn finish_category(&self, result: &CleanupResult) -> Vec<StateChange> {
        let phase = if result.success {
            CategoryPhase::Completed
        } else {
            CategoryPhase::Failed
        };

        let mut changes = self.update(|state| {
            state.category_phase = Some(phase);
            state.categories_done += 1;
            if !result.success {
                state.categories_failed += 1;
            }
            state.freed_space += result.freed_space;
        });

        let event = StateChange::CategoryFinished {
            category_id: result.category_id.clone(),
            success: result.success,
            freed_space: result.freed_space,
        };
        let _ = self.state_tx.send(event.clone());
        changes.push(event);

        changes
    }

    pub fn caches_cleared(&self) -> StateChange {
        let event = StateChange::CachesCleared;
        let _ = self.state_tx.send(event.clone());
        event
    }

    /// Drop all progress and return to `Idle` unconditionally
    pub fn reset(&self) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.reset_progress();
            state.phase = RunPhase::Idle;
        });

        let reset_event = StateChange::StateReset;
        let _ = self.state_tx.send(reset_event.clone());
        changes.push(reset_event);

        changes
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
