//! Progress through a run of sequential tag writes

/// Counters of the current batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchState {
    pub completed: u32,
    pub total: u32,
}

impl BatchState {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }

    pub fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.completed)
    }
}

/// Result of accounting one successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchProgress {
    InProgress { completed: u32, total: u32 },
    Complete { total: u32 },
}

/// Tracks completed writes against the requested total.
///
/// Once complete, further successes are rejected until `start` is called
/// again.
#[derive(Debug, Clone, Default)]
pub struct BatchController {
    state: BatchState,
}

impl BatchController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, requested_total: u32) {
        self.state = BatchState {
            completed: 0,
            total: requested_total,
        };
    }

    /// Count one confirmed write. Returns `None`, leaving the counters
    /// untouched, when no batch is active.
    pub fn on_write_success(&mut self) -> Option<BatchProgress> {
        if !self.is_active() {
            return None;
        }
        self.state.completed += 1;
        let BatchState { completed, total } = self.state;
        Some(if completed == total {
            BatchProgress::Complete { total }
        } else {
            BatchProgress::InProgress { completed, total }
        })
    }

    pub fn current(&self) -> BatchState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.total > 0 && !self.state.is_complete()
    }
}
