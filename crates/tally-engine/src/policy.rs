//! When a dirty conversation is due for recomputation.

use std::time::Duration;

use tally_core::config::SchedulerConfig;

/// Batching policy: trigger once enough changes have accumulated or once
/// the debounce interval has passed since the last trigger, whichever
/// comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub debounce: Duration,
    pub min_new_votes: u64,
}

impl BatchPolicy {
    #[must_use]
    pub const fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            debounce: config.debounce(),
            min_new_votes: config.min_new_votes,
        }
    }

    /// `elapsed` is measured from the last trigger, or from when the
    /// conversation first became dirty if it was never triggered.
    #[must_use]
    pub fn should_trigger(&self, pending_changes: u64, elapsed: Duration) -> bool {
        pending_changes > 0 && (pending_changes >= self.min_new_votes || elapsed >= self.debounce)
    }
}
