//! JSON-file backed local store.
//!
//! The whole [`LocalState`] lives in one file. A mutation is applied to a
//! copy, written to `<file>.tmp` and synced, renamed over the target and
//! only then committed in memory. A failed write leaves disk and memory as
//! they were, and the error reaches the caller.

use crate::{
    error::StoreError, CachedSnapshot, DeadLetter, LocalState, LocalStore, OperationId,
    PendingOperation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

/// A durable store persisted as a single JSON document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<LocalState>,
}

impl FileStore {
    /// Open the store at `path`, loading existing state if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(json) => LocalState::from_json(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LocalState::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            pending = state.pending.len(),
            "Opened local state"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write `state` to the temp file, fsync it and rename it over the
    /// target. The temp file never outlives a failed attempt.
    async fn persist(&self, state: &LocalState) -> Result<(), StoreError> {
        let json = state.to_json()?;
        let temp = self.temp_path();

        let written: std::io::Result<()> = async {
            let mut file = File::create(&temp).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp, &self.path).await
        }
        .await;

        if let Err(err) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %temp.display(), error = %cleanup, "Failed to remove temp state file");
                }
            }
            return Err(err.into());
        }

        // Past the rename the new state is on disk either way.
        if let Err(err) = sync_parent_dir(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to sync state directory");
        }
        Ok(())
    }

    /// Persist `next` and make it the in-memory state.
    async fn commit(
        &self,
        guard: &mut MutexGuard<'_, LocalState>,
        next: LocalState,
    ) -> Result<(), StoreError> {
        self.persist(&next).await?;
        **guard = next;
        Ok(())
    }
}

/// Make a completed rename durable by syncing the directory entry.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl LocalStore for FileStore {
    async fn enqueue_operation(&self, pending: PendingOperation) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        next.push_pending(pending);
        self.commit(&mut guard, next).await
    }

    async fn list_pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError> {
        Ok(self.state.lock().await.pending.clone())
    }

    async fn remove_operation(&self, id: OperationId) -> Result<bool, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        if !next.remove_pending(id) {
            return Ok(false);
        }
        self.commit(&mut guard, next).await?;
        Ok(true)
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn record_failure(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<Option<u32>, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let Some(attempts) = next.record_failure(id, error) else {
            return Ok(None);
        };
        self.commit(&mut guard, next).await?;
        Ok(Some(attempts))
    }

    async fn dead_letter(
        &self,
        id: OperationId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        if !next.dead_letter(id, reason, at) {
            return Ok(false);
        }
        self.commit(&mut guard, next).await?;
        Ok(true)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self.state.lock().await.dead_letters.clone())
    }

    async fn cached_snapshot(&self) -> Result<CachedSnapshot, StoreError> {
        Ok(self.state.lock().await.cache.clone())
    }

    async fn replace_cached_snapshot(&self, snapshot: CachedSnapshot) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        next.cache = snapshot;
        self.commit(&mut guard, next).await
    }

    async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.state.lock().await.last_sync)
    }

    async fn set_last_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        next.last_sync = Some(at);
        self.commit(&mut guard, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HabitChanges, HabitOp, Operation};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_709_251_200 + secs, 0).unwrap()
    }

    fn rename(id: &str, name: &str) -> PendingOperation {
        PendingOperation::new(
            Operation::Habit(HabitOp::Update {
                id: id.into(),
                changes: HabitChanges::rename(name),
            }),
            at(0),
        )
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let first = rename("h-1", "Read");
        let second = rename("h-1", "Read daily");
        let first_id = first.id;
        {
            let store = FileStore::open(&path).await.unwrap();
            store.enqueue_operation(first).await.unwrap();
            store.enqueue_operation(second).await.unwrap();
            store.remove_operation(first_id).await.unwrap();
            store.set_last_sync(at(30)).await.unwrap();
        }

        let reopened = FileStore::open(&path).await.unwrap();
        let pending = reopened.list_pending_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].operation,
            Operation::Habit(HabitOp::Update {
                id: "h-1".into(),
                changes: HabitChanges::rename("Read daily"),
            })
        );
        assert_eq!(reopened.last_sync().await.unwrap(), Some(at(30)));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_opens_empty_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_write_surfaces_and_keeps_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let store = FileStore::open(nested.join("state.json")).await.unwrap();

        std::fs::remove_dir_all(&nested).unwrap();

        let result = store.enqueue_operation(rename("h-1", "Read")).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).await.unwrap();

        // A non-empty directory at the target makes the rename fail after
        // the temp file has been written.
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let result = store.enqueue_operation(rename("h-1", "Read")).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!dir.path().join("state.json.tmp").exists());
        assert_eq!(store.pending_count().await.unwrap(), 0);

        std::fs::remove_dir_all(&path).unwrap();
        store.enqueue_operation(rename("h-1", "Read")).await.unwrap();
        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.pending_count().await.unwrap(), 1);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn removing_absent_id_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).await.unwrap();

        assert!(!store.remove_operation(OperationId::new()).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn rejects_newer_format_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"format_version": 7}"#).unwrap();

        let result = FileStore::open(&path).await;
        assert!(matches!(
            result,
            Err(StoreError::UnsupportedFormat { found: 7, .. })
        ));
    }
}
