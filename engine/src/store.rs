//! Local persistent store.
//!
//! [`LocalStore`] is the boundary to whatever persists the queue and the
//! cache on the device. Every method is atomic with respect to every other,
//! so a drain pass never observes a half-written entry.

use crate::{
    error::StoreError, CachedSnapshot, DeadLetter, LocalState, OperationId, PendingOperation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Durable storage for pending operations and cached remote data.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Append an operation. Must be durable before returning `Ok`.
    async fn enqueue_operation(&self, pending: PendingOperation) -> Result<(), StoreError>;

    /// Queue contents in enqueue order.
    async fn list_pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError>;

    /// Remove one operation. Returns whether it was present.
    async fn remove_operation(&self, id: OperationId) -> Result<bool, StoreError>;

    async fn pending_count(&self) -> Result<usize, StoreError>;

    /// Record a failed apply attempt. Returns the new attempt count.
    async fn record_failure(&self, id: OperationId, error: &str)
        -> Result<Option<u32>, StoreError>;

    /// Move an operation out of the queue into the dead-letter list.
    async fn dead_letter(
        &self,
        id: OperationId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError>;

    async fn cached_snapshot(&self) -> Result<CachedSnapshot, StoreError>;

    /// Overwrite the cached snapshot as a whole.
    async fn replace_cached_snapshot(&self, snapshot: CachedSnapshot) -> Result<(), StoreError>;

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// A non-durable store kept entirely in memory.
///
/// Writes can be made to fail on demand to exercise persistence-failure
/// paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<LocalState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state.
    pub fn with_state(state: LocalState) -> Self {
        Self {
            state: Mutex::new(state),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// A copy of the full state.
    pub async fn state(&self) -> LocalState {
        self.state.lock().await.clone()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn enqueue_operation(&self, pending: PendingOperation) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state.lock().await.push_pending(pending);
        Ok(())
    }

    async fn list_pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError> {
        Ok(self.state.lock().await.pending.clone())
    }

    async fn remove_operation(&self, id: OperationId) -> Result<bool, StoreError> {
        self.check_writable()?;
        Ok(self.state.lock().await.remove_pending(id))
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn record_failure(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<Option<u32>, StoreError> {
        self.check_writable()?;
        Ok(self.state.lock().await.record_failure(id, error))
    }

    async fn dead_letter(
        &self,
        id: OperationId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        Ok(self.state.lock().await.dead_letter(id, reason, at))
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self.state.lock().await.dead_letters.clone())
    }

    async fn cached_snapshot(&self) -> Result<CachedSnapshot, StoreError> {
        Ok(self.state.lock().await.cache.clone())
    }

    async fn replace_cached_snapshot(&self, snapshot: CachedSnapshot) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state.lock().await.cache = snapshot;
        Ok(())
    }

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.state.lock().await.last_sync)
    }

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state.lock().await.last_sync = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryOp, Habit, Operation};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_709_251_200 + secs, 0).unwrap()
    }

    fn pending(record: &str) -> PendingOperation {
        PendingOperation::new(
            Operation::Entry(EntryOp::Delete { id: record.into() }),
            at(0),
        )
    }

    #[tokio::test]
    async fn enqueue_list_remove() {
        let store = MemoryStore::new();
        let a = pending("a");
        let b = pending("b");
        let a_id = a.id;

        store.enqueue_operation(a).await.unwrap();
        store.enqueue_operation(b).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 2);

        assert!(store.remove_operation(a_id).await.unwrap());
        assert!(!store.remove_operation(a_id).await.unwrap());

        let remaining = store.list_pending_operations().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].operation.record_id(), "b");
    }

    #[tokio::test]
    async fn failed_writes_leave_state_untouched() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let result = store.enqueue_operation(pending("a")).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.pending_count().await.unwrap(), 0);

        store.set_fail_writes(false);
        store.enqueue_operation(pending("a")).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn snapshot_is_replaced_whole() {
        let store = MemoryStore::new();
        let habit = |id: &str| Habit {
            id: id.into(),
            name: id.into(),
            description: None,
            category_id: None,
            color: None,
            icon: None,
            target_per_day: 1,
            is_active: true,
            created_at: None,
            updated_at: None,
        };

        store
            .replace_cached_snapshot(CachedSnapshot {
                habits: vec![habit("a"), habit("b")],
                ..CachedSnapshot::default()
            })
            .await
            .unwrap();
        store
            .replace_cached_snapshot(CachedSnapshot {
                habits: vec![habit("c")],
                ..CachedSnapshot::default()
            })
            .await
            .unwrap();

        let cache = store.cached_snapshot().await.unwrap();
        assert_eq!(cache.habits.len(), 1);
        assert!(cache.habit("c").is_some());
    }

    #[tokio::test]
    async fn last_sync_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.last_sync().await.unwrap(), None);
        store.set_last_sync(at(42)).await.unwrap();
        assert_eq!(store.last_sync().await.unwrap(), Some(at(42)));
    }
}
