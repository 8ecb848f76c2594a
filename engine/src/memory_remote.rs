//! In-memory remote backend.
//!
//! Behaves like the real backend where the engine depends on it (owner
//! scoping, unique ids, not-found on update) and lets callers inject
//! faults: an unreachable flag, one-shot faults and sticky per-record
//! faults.

use crate::{
    error::RemoteError,
    remote::{RemoteBackend, Selector, OWNER_COLUMN},
    Collection, Row,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// An owner-scoped, concurrent in-memory backend.
#[derive(Debug)]
pub struct MemoryBackend {
    rows: DashMap<(Collection, String), Row>,
    reachable: AtomicBool,
    queued_faults: Mutex<VecDeque<RemoteError>>,
    record_faults: DashMap<String, RemoteError>,
    calls: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            reachable: AtomicBool::new(true),
            queued_faults: Mutex::new(VecDeque::new()),
            record_faults: DashMap::new(),
            calls: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// When unreachable, every call fails with a network error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next data call (insert, update, delete or select) with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.faults().push_back(error);
    }

    /// Fail every write that targets `record_id` until cleared.
    pub fn fail_record(&self, record_id: impl Into<String>, error: RemoteError) {
        self.record_faults.insert(record_id.into(), error);
    }

    pub fn clear_record_fault(&self, record_id: &str) {
        self.record_faults.remove(record_id);
    }

    /// Place a row directly, bypassing faults and counters.
    pub fn seed(&self, collection: Collection, owner: &str, mut row: Row) {
        row.insert(OWNER_COLUMN.to_string(), Value::String(owner.to_string()));
        let id = row_id(&row).unwrap_or_default();
        self.rows.insert((collection, id), row);
    }

    pub fn get(&self, collection: Collection, id: &str) -> Option<Row> {
        self.rows
            .get(&(collection, id.to_string()))
            .map(|r| r.value().clone())
    }

    /// All rows of a collection, ordered by id.
    pub fn rows(&self, collection: Collection) -> Vec<Row> {
        let mut rows: Vec<(String, Row)> = self
            .rows
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, row)| row).collect()
    }

    /// Total calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successful inserts, updates and deletes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, VecDeque<RemoteError>> {
        self.queued_faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call and return any fault that applies to it.
    fn gate(&self, record_id: Option<&str>) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("backend unreachable".to_string()));
        }
        if let Some(error) = self.faults().pop_front() {
            return Err(error);
        }
        if let Some(fault) = record_id.and_then(|id| self.record_faults.get(id)) {
            return Err(fault.value().clone());
        }
        Ok(())
    }
}

fn row_id(row: &Row) -> Option<String> {
    row.get("id").and_then(Value::as_str).map(str::to_string)
}

fn owned_by(row: &Row, owner: &str) -> bool {
    row.get(OWNER_COLUMN).and_then(Value::as_str) == Some(owner)
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn health_check(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Network("backend unreachable".to_string()))
        }
    }

    async fn insert(
        &self,
        collection: Collection,
        owner: &str,
        mut row: Row,
    ) -> Result<Row, RemoteError> {
        let id = row_id(&row).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.gate(Some(&id))?;

        row.insert("id".to_string(), Value::String(id.clone()));
        row.insert(OWNER_COLUMN.to_string(), Value::String(owner.to_string()));

        match self.rows.entry((collection, id.clone())) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RemoteError::Conflict(format!(
                "duplicate key value violates unique constraint on {}.id = {}",
                collection.table_name(),
                id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(row.clone());
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(row)
            }
        }
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        owner: &str,
        changes: Row,
    ) -> Result<Row, RemoteError> {
        self.gate(Some(id))?;

        let mut row = self
            .rows
            .get_mut(&(collection, id.to_string()))
            .filter(|r| owned_by(r.value(), owner))
            .ok_or_else(|| {
                RemoteError::NotFound(format!("{} {}", collection.table_name(), id))
            })?;

        for (column, value) in changes {
            if column == "id" || column == OWNER_COLUMN {
                continue;
            }
            row.insert(column, value);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row.value().clone())
    }

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
        owner: &str,
    ) -> Result<(), RemoteError> {
        self.gate(Some(id))?;

        let removed = self
            .rows
            .remove_if(&(collection, id.to_string()), |_, row| owned_by(row, owner));
        if removed.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn select(
        &self,
        collection: Collection,
        owner: &str,
        selector: &Selector,
    ) -> Result<Vec<Row>, RemoteError> {
        self.gate(None)?;

        let mut rows: Vec<Row> = self
            .rows(collection)
            .into_iter()
            .filter(|row| owned_by(row, owner) && selector.matches(row))
            .collect();
        if let Some(limit) = selector.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn insert_stamps_owner_and_rejects_duplicates() {
        let backend = MemoryBackend::new();

        let inserted = backend
            .insert(Collection::Habits, "u-1", row(json!({"id": "h-1", "name": "Read"})))
            .await
            .unwrap();
        assert_eq!(inserted["user_id"], json!("u-1"));

        let dup = backend
            .insert(Collection::Habits, "u-1", row(json!({"id": "h-1", "name": "Again"})))
            .await;
        assert!(matches!(dup, Err(RemoteError::Conflict(_))));
        assert_eq!(backend.write_count(), 1);
    }

    #[tokio::test]
    async fn update_is_owner_scoped() {
        let backend = MemoryBackend::new();
        backend.seed(Collection::Habits, "u-1", row(json!({"id": "h-1", "name": "Read"})));

        let other = backend
            .update(Collection::Habits, "h-1", "u-2", row(json!({"name": "Hijack"})))
            .await;
        assert!(matches!(other, Err(RemoteError::NotFound(_))));

        let updated = backend
            .update(
                Collection::Habits,
                "h-1",
                "u-1",
                row(json!({"name": "Read more", "user_id": "u-2"})),
            )
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("Read more"));
        assert_eq!(updated["user_id"], json!("u-1"));
    }

    #[tokio::test]
    async fn select_filters_by_owner_and_selector() {
        let backend = MemoryBackend::new();
        backend.seed(
            Collection::Entries,
            "u-1",
            row(json!({"id": "e-1", "habit_id": "h-1", "date": "2024-03-01"})),
        );
        backend.seed(
            Collection::Entries,
            "u-1",
            row(json!({"id": "e-2", "habit_id": "h-2", "date": "2024-03-01"})),
        );
        backend.seed(
            Collection::Entries,
            "u-2",
            row(json!({"id": "e-3", "habit_id": "h-1", "date": "2024-03-01"})),
        );

        let rows = backend
            .select(Collection::Entries, "u-1", &Selector::new().eq("habit_id", "h-1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("e-1"));
    }

    #[tokio::test]
    async fn faults_are_injected() {
        let backend = MemoryBackend::new();
        backend.fail_next(RemoteError::Server {
            status: 502,
            message: "bad gateway".into(),
        });

        let first = backend
            .select(Collection::Habits, "u-1", &Selector::new())
            .await;
        assert!(matches!(first, Err(RemoteError::Server { status: 502, .. })));
        assert!(backend
            .select(Collection::Habits, "u-1", &Selector::new())
            .await
            .is_ok());

        backend.fail_record("h-9", RemoteError::Validation("bad".into()));
        let write = backend
            .insert(Collection::Habits, "u-1", row(json!({"id": "h-9", "name": "x"})))
            .await;
        assert!(matches!(write, Err(RemoteError::Validation(_))));

        backend.set_reachable(false);
        assert!(backend.health_check().await.is_err());
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn delete_missing_row_succeeds() {
        let backend = MemoryBackend::new();
        backend
            .delete(Collection::Categories, "c-404", "u-1")
            .await
            .unwrap();
        assert_eq!(backend.write_count(), 0);
    }
}
