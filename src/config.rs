//! Engine configuration

use std::time::Duration;

/// Largest number of tags one write request may cover
pub const MAX_BATCH: u32 = 100;

/// Timing and sizing of the monitor loop
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MonitorConfig {
    /// Pause between polls while the reader answers
    pub poll_interval: Duration,
    /// Pause between polls after the reader has been declared disconnected
    pub degraded_poll_interval: Duration,
    /// Consecutive poll failures before the reader counts as disconnected
    pub disconnect_threshold: u32,
    /// Attempts per tag presentation, including the first
    pub max_attempts: u32,
    /// Capacity of the event channel
    pub event_capacity: usize,
    /// Data area assumed when the capability container declares none
    pub default_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            degraded_poll_interval: Duration::from_secs(1),
            disconnect_threshold: 5,
            max_attempts: 2,
            event_capacity: 64,
            default_capacity: 48,
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_degraded_poll_interval(mut self, interval: Duration) -> Self {
        self.degraded_poll_interval = interval;
        self
    }

    pub fn with_disconnect_threshold(mut self, failures: u32) -> Self {
        self.disconnect_threshold = failures.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_default_capacity(mut self, capacity: usize) -> Self {
        self.default_capacity = capacity;
        self
    }
}
