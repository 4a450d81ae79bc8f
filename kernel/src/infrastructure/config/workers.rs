//! Plan and apply worker settings.

use std::time::Duration;

use serde::Deserialize;

/// Polling intervals and wake-up buffer sizes.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    /// Plan worker scan interval in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub plan_poll_interval_ms: u64,
    /// Apply worker scan interval in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub apply_poll_interval_ms: u64,
    /// Buffered wake-ups per worker.
    #[serde(default = "default_wake_capacity")]
    pub wake_capacity: usize,
}

impl WorkerSettings {
    /// Plan worker scan interval.
    #[must_use]
    pub fn plan_poll_interval(&self) -> Duration {
        Duration::from_millis(self.plan_poll_interval_ms)
    }

    /// Apply worker scan interval.
    #[must_use]
    pub fn apply_poll_interval(&self) -> Duration {
        Duration::from_millis(self.apply_poll_interval_ms)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            plan_poll_interval_ms: default_poll_ms(),
            apply_poll_interval_ms: default_poll_ms(),
            wake_capacity: default_wake_capacity(),
        }
    }
}

fn default_poll_ms() -> u64 {
    5_000
}

fn default_wake_capacity() -> usize {
    64
}
