//! Engine configuration.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do with an operation that keeps failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "cycles", rename_all = "snake_case")]
pub enum DeadLetterPolicy {
    /// Keep it queued and replay it every cycle.
    #[default]
    Retain,
    /// Move it to the dead-letter list once it has failed in this many cycles.
    DropAfter(u32),
}

impl DeadLetterPolicy {
    pub fn should_dead_letter(&self, failed_cycles: u32) -> bool {
        match self {
            DeadLetterPolicy::Retain => false,
            DeadLetterPolicy::DropAfter(limit) => failed_cycles >= (*limit).max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Period of the auto-sync timer.
    pub sync_interval: Duration,
    /// Applied to every remote call made during a cycle.
    pub retry: RetryPolicy,
    /// Bound on each connectivity check.
    pub probe_timeout: Duration,
    /// How many days of entries the merge fetcher downloads.
    pub entry_lookback_days: u32,
    pub dead_letter: DeadLetterPolicy,
    /// Refresh the cache even when the queue is empty.
    pub refresh_when_idle: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
            probe_timeout: Duration::from_secs(5),
            entry_lookback_days: 30,
            dead_letter: DeadLetterPolicy::Retain,
            refresh_when_idle: false,
        }
    }
}

impl SyncConfig {
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_entry_lookback_days(mut self, days: u32) -> Self {
        self.entry_lookback_days = days;
        self
    }

    pub fn with_dead_letter(mut self, policy: DeadLetterPolicy) -> Self {
        self.dead_letter = policy;
        self
    }

    pub fn with_refresh_when_idle(mut self, refresh: bool) -> Self {
        self.refresh_when_idle = refresh;
        self
    }
}
