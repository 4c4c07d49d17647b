//! Controller status machine

use grid_shared::{GridError, GridResult, GridStatus};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;

/// A status change that actually happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: GridStatus,
    pub to: GridStatus,
}

impl StatusChange {
    /// Whether the loading indicator flipped
    pub fn loading_toggled(&self) -> bool {
        self.from.is_loading() != self.to.is_loading()
    }
}

/// Tracks the status of one mounted grid and rejects impossible transitions
#[derive(Clone)]
pub struct StatusMachine {
    state: Arc<RwLock<GridStatus>>,
    history: Arc<RwLock<Vec<(Instant, GridStatus)>>>,
    stats: Arc<RwLock<LifecycleStats>>,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(GridStatus::Idle)),
            history: Arc::new(RwLock::new(vec![(Instant::now(), GridStatus::Idle)])),
            stats: Arc::new(RwLock::new(LifecycleStats::default())),
        }
    }

    pub fn get_state(&self) -> GridStatus {
        *self.state.read()
    }

    /// Move to `new_state`. Returns `None` when already there.
    pub fn transition_to(&self, new_state: GridStatus) -> GridResult<Option<StatusChange>> {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            if old == new_state {
                return Ok(None);
            }

            if !Self::is_valid_transition(old, new_state) {
                self.stats.write().rejected_transitions += 1;
                return Err(GridError::internal(format!(
                    "Invalid status transition from {old:?} to {new_state:?}"
                )));
            }

            *state = new_state;
            old
        };

        {
            let mut history = self.history.write();
            history.push((Instant::now(), new_state));
            if history.len() > MAX_HISTORY {
                history.remove(0);
            }
        }

        let mut stats = self.stats.write();
        stats.state_transitions += 1;
        if new_state == GridStatus::Error {
            stats.errors_reported += 1;
        }
        log::debug!("Grid status {old_state:?} -> {new_state:?}");

        Ok(Some(StatusChange {
            from: old_state,
            to: new_state,
        }))
    }

    /// Statuses visited so far, oldest first
    pub fn history(&self) -> Vec<GridStatus> {
        self.history.read().iter().map(|(_, s)| *s).collect()
    }

    pub fn get_stats(&self) -> LifecycleStats {
        self.stats.read().clone()
    }

    fn is_valid_transition(from: GridStatus, to: GridStatus) -> bool {
        use GridStatus::*;

        match (from, to) {
            // Mount
            (Idle, Loading | Ready) => true,

            // Fetch outcomes
            (Loading | Refreshing, Ready | Error) => true,

            // State changes while showing rows
            (Ready, Loading | Refreshing) => true,
            (Loading, Refreshing) | (Refreshing, Loading) => true,

            // Recovery
            (Error, Loading | Refreshing | Ready) => true,

            // Internal faults reset the view from anywhere
            (Ready, Error) => true,

            // Unmount
            (_, Idle) => true,

            _ => false,
        }
    }
}

const MAX_HISTORY: usize = 64;

/// Lifecycle statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStats {
    pub state_transitions: u64,
    pub rejected_transitions: u64,
    pub errors_reported: u64,
}
