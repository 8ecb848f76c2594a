//! Collection-specific appliers.
//!
//! [`OperationApplier`] turns one queued [`Operation`] into remote writes.
//! Every remote call goes through [`with_retry`] under the configured
//! policy, and every call is scoped to the authenticated owner.
//!
//! Replay is idempotent: a create the remote already holds is applied as an
//! update, deletes of missing rows succeed, and an entry create for a
//! (habit, date) pair that already exists updates that row instead.

use crate::{
    auth::Identity,
    error::{RemoteError, RemoteOperationError},
    operation::to_row,
    remote::{RemoteBackend, Selector},
    retry::{with_retry, RetryPolicy},
    CategoryOp, Clock, Collection, EntryOp, HabitChanges, HabitOp, NewEntry, Operation, Row,
};
use serde_json::Value;
use std::sync::Arc;

/// What a successful apply did remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    /// Habit marked inactive.
    SoftDeleted,
    Deleted,
    /// The target row was already gone.
    AlreadyDeleted,
    /// Entry create folded into the existing row for its (habit, date).
    MergedIntoExisting,
}

#[derive(Clone)]
pub struct OperationApplier {
    backend: Arc<dyn RemoteBackend>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl OperationApplier {
    pub fn new(backend: Arc<dyn RemoteBackend>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            clock,
            policy,
        }
    }

    /// Apply one operation on behalf of `identity`.
    pub async fn apply(
        &self,
        identity: &Identity,
        operation: &Operation,
    ) -> Result<Applied, RemoteOperationError> {
        let owner = identity.user_id.as_str();
        match operation {
            Operation::Habit(op) => self.apply_habit(owner, op).await,
            Operation::Category(op) => self.apply_category(owner, op).await,
            Operation::Entry(op) => self.apply_entry(owner, op).await,
        }
    }

    async fn apply_habit(&self, owner: &str, op: &HabitOp) -> Result<Applied, RemoteOperationError> {
        let collection = Collection::Habits;
        match op {
            HabitOp::Create(new) => {
                let mut row = to_row(new);
                row.insert("is_active".to_string(), Value::Bool(true));
                self.insert_or_update(collection, owner, &new.id, row, to_row(&new.as_changes()))
                    .await
            }
            HabitOp::Update { id, changes } => {
                self.update(collection, owner, id, to_row(changes)).await?;
                Ok(Applied::Updated)
            }
            HabitOp::Delete { id } => {
                let changes = HabitChanges {
                    is_active: Some(false),
                    ..HabitChanges::default()
                };
                match self.update(collection, owner, id, to_row(&changes)).await {
                    Ok(()) => Ok(Applied::SoftDeleted),
                    Err(err) if matches!(err.cause, RemoteError::NotFound(_)) => {
                        Ok(Applied::AlreadyDeleted)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn apply_category(
        &self,
        owner: &str,
        op: &CategoryOp,
    ) -> Result<Applied, RemoteOperationError> {
        let collection = Collection::Categories;
        match op {
            CategoryOp::Create(new) => {
                self.insert_or_update(collection, owner, &new.id, to_row(new), to_row(&new.as_changes()))
                    .await
            }
            CategoryOp::Update { id, changes } => {
                self.update(collection, owner, id, to_row(changes)).await?;
                Ok(Applied::Updated)
            }
            CategoryOp::Delete { id } => self.delete(collection, owner, id).await,
        }
    }

    async fn apply_entry(&self, owner: &str, op: &EntryOp) -> Result<Applied, RemoteOperationError> {
        let collection = Collection::Entries;
        match op {
            EntryOp::Create(new) => self.create_entry(owner, new).await,
            EntryOp::Update { id, changes } => {
                self.update(collection, owner, id, to_row(changes)).await?;
                Ok(Applied::Updated)
            }
            EntryOp::Delete { id } => self.delete(collection, owner, id).await,
        }
    }

    /// Insert an entry unless its (habit, date) row already exists.
    async fn create_entry(&self, owner: &str, new: &NewEntry) -> Result<Applied, RemoteOperationError> {
        let collection = Collection::Entries;
        let selector = Selector::new()
            .eq("habit_id", new.habit_id.as_str())
            .eq("date", new.date.to_string())
            .limit(1);

        let existing = with_retry(&self.policy, || {
            self.backend.select(collection, owner, &selector)
        })
        .await?;

        let existing_id = existing
            .first()
            .and_then(|row| row.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match existing_id {
            Some(existing_id) => {
                tracing::debug!(
                    record_id = %new.id,
                    existing_id = %existing_id,
                    habit_id = %new.habit_id,
                    date = %new.date,
                    "Entry already exists for habit and date, updating it"
                );
                self.update(collection, owner, &existing_id, to_row(&new.completion_changes()))
                    .await?;
                if existing_id == new.id {
                    Ok(Applied::Updated)
                } else {
                    Ok(Applied::MergedIntoExisting)
                }
            }
            None => {
                self.insert_or_update(
                    collection,
                    owner,
                    &new.id,
                    to_row(new),
                    to_row(&new.completion_changes()),
                )
                .await
            }
        }
    }

    /// Insert `row`; if the remote already holds this id, apply `changes`
    /// to it instead.
    async fn insert_or_update(
        &self,
        collection: Collection,
        owner: &str,
        id: &str,
        row: Row,
        changes: Row,
    ) -> Result<Applied, RemoteOperationError> {
        let inserted = with_retry(&self.policy, || {
            self.backend.insert(collection, owner, row.clone())
        })
        .await;

        match inserted {
            Ok(_) => Ok(Applied::Inserted),
            Err(err) if matches!(err.cause, RemoteError::Conflict(_)) => {
                tracing::debug!(%collection, record_id = %id, "Create already applied remotely, updating instead");
                self.update(collection, owner, id, changes).await?;
                Ok(Applied::Updated)
            }
            Err(err) => Err(err),
        }
    }

    /// Update by id and owner, stamping `updated_at`.
    async fn update(
        &self,
        collection: Collection,
        owner: &str,
        id: &str,
        mut changes: Row,
    ) -> Result<(), RemoteOperationError> {
        changes.insert(
            "updated_at".to_string(),
            Value::String(self.clock.now().to_rfc3339()),
        );

        with_retry(&self.policy, || {
            self.backend.update(collection, id, owner, changes.clone())
        })
        .await?;
        Ok(())
    }

    async fn delete(
        &self,
        collection: Collection,
        owner: &str,
        id: &str,
    ) -> Result<Applied, RemoteOperationError> {
        match with_retry(&self.policy, || self.backend.delete(collection, id, owner)).await {
            Ok(()) => Ok(Applied::Deleted),
            Err(err) if matches!(err.cause, RemoteError::NotFound(_)) => Ok(Applied::AlreadyDeleted),
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for OperationApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationApplier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
