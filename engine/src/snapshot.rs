//! Persisted local state.
//!
//! [`LocalState`] is everything the local store owns: the pending queue,
//! dead letters, the cached snapshot of remote data and the last-sync time.
//! It is the unit a store persists, so every mutation below is applied to
//! one value and written out whole.

use crate::{
    error::StoreError, Category, DeadLetter, Entry, Habit, OperationId, PendingOperation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the persisted format for future compatibility.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Locally cached copy of the server of record.
///
/// Replaced as a whole by each successful download; never diffed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub habits: Vec<Habit>,
    pub categories: Vec<Category>,
    pub entries: Vec<Entry>,
    /// When this snapshot was downloaded.
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl CachedSnapshot {
    pub fn is_empty(&self) -> bool {
        self.habits.is_empty() && self.categories.is_empty() && self.entries.is_empty()
    }

    pub fn habit(&self, id: &str) -> Option<&Habit> {
        self.habits.iter().find(|h| h.id == id)
    }
}

/// All state owned by a local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    pub format_version: u32,
    /// Pending operations in enqueue order.
    #[serde(default)]
    pub pending: Vec<PendingOperation>,
    #[serde(default)]
    pub dead_letters: Vec<DeadLetter>,
    #[serde(default)]
    pub cache: CachedSnapshot,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            pending: Vec::new(),
            dead_letters: Vec::new(),
            cache: CachedSnapshot::default(),
            last_sync: None,
        }
    }
}

impl LocalState {
    /// Append to the tail of the queue.
    pub fn push_pending(&mut self, pending: PendingOperation) {
        self.pending.push(pending);
    }

    /// Remove one queued operation. Returns whether it was present.
    pub fn remove_pending(&mut self, id: OperationId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Bump the failure counter of a queued operation.
    ///
    /// Returns the new attempt count, or `None` if the id is not queued.
    pub fn record_failure(&mut self, id: OperationId, error: &str) -> Option<u32> {
        let index = self.position(id)?;
        let pending = &mut self.pending[index];
        pending.attempts = pending.attempts.saturating_add(1);
        pending.last_error = Some(error.to_string());
        Some(pending.attempts)
    }

    /// Move a queued operation to the dead-letter list.
    pub fn dead_letter(&mut self, id: OperationId, reason: &str, at: DateTime<Utc>) -> bool {
        match self.position(id) {
            Some(index) => {
                let pending = self.pending.remove(index);
                self.dead_letters.push(DeadLetter {
                    pending,
                    reason: reason.to_string(),
                    dead_lettered_at: at,
                });
                true
            }
            None => false,
        }
    }

    fn position(&self, id: OperationId) -> Option<usize> {
        self.pending.iter().position(|p| p.id == id)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON, rejecting formats newer than this build.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let state: Self = serde_json::from_str(json)?;

        if state.format_version > STATE_FORMAT_VERSION {
            return Err(StoreError::UnsupportedFormat {
                found: state.format_version,
                supported: STATE_FORMAT_VERSION,
            });
        }

        Ok(state)
    }
}
