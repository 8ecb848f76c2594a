//! The pending-operation queue.
//!
//! [`PendingOperationStore`] assigns ids and timestamps and delegates
//! persistence to a [`LocalStore`]. It holds no copy of the queue itself,
//! so the engine always sees what the store has.

use crate::{error::StoreError, Clock, LocalStore, Operation, OperationId, PendingOperation};
use std::sync::Arc;

/// Durable, ordered queue of operations not yet confirmed remotely.
#[derive(Clone)]
pub struct PendingOperationStore {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
}

impl PendingOperationStore {
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an operation to the queue.
    ///
    /// The operation is not durably queued until this returns `Ok`.
    pub async fn enqueue(&self, operation: Operation) -> Result<OperationId, StoreError> {
        let pending = PendingOperation::new(operation, self.clock.now());
        let id = pending.id;
        let collection = pending.operation.collection();
        let kind = pending.operation.kind();

        self.store.enqueue_operation(pending).await?;

        tracing::debug!(op_id = %id, %collection, %kind, "Queued operation");
        Ok(id)
    }

    /// Snapshot of the queue in enqueue order.
    pub async fn list_pending(&self) -> Result<Vec<PendingOperation>, StoreError> {
        self.store.list_pending_operations().await
    }

    /// Remove one operation. Removing an absent id is a no-op.
    pub async fn remove(&self, id: OperationId) -> Result<(), StoreError> {
        if !self.store.remove_operation(id).await? {
            tracing::trace!(op_id = %id, "Operation already removed");
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.store.pending_count().await
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.count().await? == 0)
    }

    /// Note a failed apply attempt. Returns the operation's attempt count.
    pub async fn record_failure(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<Option<u32>, StoreError> {
        self.store.record_failure(id, error).await
    }

    /// Give up on an operation.
    pub async fn dead_letter(&self, id: OperationId, reason: &str) -> Result<bool, StoreError> {
        self.store.dead_letter(id, reason, self.clock.now()).await
    }
}

impl std::fmt::Debug for PendingOperationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperationStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
