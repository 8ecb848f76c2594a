//! Download-and-merge of the server of record.

use crate::{
    auth::Identity,
    error::{Error, RemoteError, RemoteOperationError},
    remote::{RemoteBackend, Selector},
    retry::{with_retry, RetryPolicy},
    CachedSnapshot, Category, Clock, Collection, Entry, Habit, LocalStore, Row,
};
use chrono::{Days, NaiveDate};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Record counts of a completed download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub habits: usize,
    pub categories: usize,
    pub entries: usize,
}

/// Fetches active habits, all categories and recent entries, and replaces
/// the local cache with them.
///
/// The entry window is `lookback_days` back from today (inclusive). The
/// cache is only written once all three collections have been fetched and
/// decoded; any failure leaves it as it was.
#[derive(Clone)]
pub struct RemoteMergeFetcher {
    backend: Arc<dyn RemoteBackend>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    lookback_days: u32,
}

impl RemoteMergeFetcher {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        store: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        lookback_days: u32,
    ) -> Self {
        Self {
            backend,
            store,
            clock,
            policy,
            lookback_days,
        }
    }

    pub async fn download_latest(&self, identity: &Identity) -> Result<MergeSummary, Error> {
        let owner = identity.user_id.as_str();
        let since = self.window_start();

        let active_habits = Selector::new().eq("is_active", true);
        let all_categories = Selector::new();
        let recent_entries = Selector::new().since("date", since);

        let (habits, categories, entries) = tokio::try_join!(
            self.fetch::<Habit>(Collection::Habits, owner, &active_habits),
            self.fetch::<Category>(Collection::Categories, owner, &all_categories),
            self.fetch::<Entry>(Collection::Entries, owner, &recent_entries),
        )?;

        let summary = MergeSummary {
            habits: habits.len(),
            categories: categories.len(),
            entries: entries.len(),
        };

        self.store
            .replace_cached_snapshot(CachedSnapshot {
                habits,
                categories,
                entries,
                fetched_at: Some(self.clock.now()),
            })
            .await?;

        tracing::debug!(
            habits = summary.habits,
            categories = summary.categories,
            entries = summary.entries,
            %since,
            "Replaced local cache"
        );
        Ok(summary)
    }

    /// First day of the entry window. A window reaching past the earliest
    /// representable date starts there.
    pub fn window_start(&self) -> NaiveDate {
        self.clock
            .today()
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        collection: Collection,
        owner: &str,
        selector: &Selector,
    ) -> Result<Vec<T>, RemoteOperationError> {
        let rows = with_retry(&self.policy, || {
            self.backend.select(collection, owner, selector)
        })
        .await?;

        rows.into_iter()
            .map(|row| decode(collection, row))
            .collect()
    }
}

fn decode<T: DeserializeOwned>(collection: Collection, row: Row) -> Result<T, RemoteOperationError> {
    let id = row
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<no id>")
        .to_string();

    serde_json::from_value(Value::Object(row)).map_err(|e| RemoteOperationError {
        cause: RemoteError::Decode(format!("{collection} row {id}: {e}")),
        attempts: 1,
    })
}

impl std::fmt::Debug for RemoteMergeFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMergeFetcher")
            .field("lookback_days", &self.lookback_days)
            .finish_non_exhaustive()
    }
}
