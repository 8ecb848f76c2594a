//! Remote backend boundary.
//!
//! The engine talks to the server of record through [`RemoteBackend`]:
//! owner-scoped CRUD over the three collections, addressed by table. Rows
//! are plain JSON objects; typed records are produced by the merge fetcher.

use crate::{error::RemoteError, Collection, Row};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

/// Column holding the owning user's id on every remote table.
pub const OWNER_COLUMN: &str = "user_id";

/// Inclusive date bounds on a date column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub column: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Row filter for [`RemoteBackend::select`]. Owner scoping is implicit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    pub equals: Vec<(String, Value)>,
    pub date_range: Option<DateRange>,
    pub limit: Option<usize>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((column.into(), value.into()));
        self
    }

    /// Rows whose `column` date is on or after `from`.
    pub fn since(mut self, column: impl Into<String>, from: NaiveDate) -> Self {
        let range = self.date_range.get_or_insert_with(|| DateRange {
            column: String::new(),
            from: None,
            to: None,
        });
        range.column = column.into();
        range.from = Some(from);
        self
    }

    /// Rows whose `column` date is on or before `to`.
    pub fn until(mut self, column: impl Into<String>, to: NaiveDate) -> Self {
        let range = self.date_range.get_or_insert_with(|| DateRange {
            column: String::new(),
            from: None,
            to: None,
        });
        range.column = column.into();
        range.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `row` satisfies the equality and date filters.
    pub fn matches(&self, row: &Row) -> bool {
        let equal = self
            .equals
            .iter()
            .all(|(column, value)| row.get(column) == Some(value));
        if !equal {
            return false;
        }

        let Some(range) = &self.date_range else {
            return true;
        };
        let Some(date) = row
            .get(&range.column)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<NaiveDate>().ok())
        else {
            return false;
        };

        range.from.map_or(true, |from| date >= from) && range.to.map_or(true, |to| date <= to)
    }
}

/// Authenticated CRUD over the remote collections.
///
/// Every call is scoped to `owner`: inserts are stamped with it, and
/// updates, deletes and selects only see rows it owns.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Cheap reachability check, used by the connectivity probe.
    async fn health_check(&self) -> Result<(), RemoteError>;

    /// Insert a row. A duplicate id is reported as [`RemoteError::Conflict`].
    async fn insert(&self, collection: Collection, owner: &str, row: Row)
        -> Result<Row, RemoteError>;

    /// Update the row with `id`. A missing row is [`RemoteError::NotFound`].
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        owner: &str,
        changes: Row,
    ) -> Result<Row, RemoteError>;

    /// Hard-delete the row with `id`. Deleting a missing row succeeds.
    async fn delete(&self, collection: Collection, id: &str, owner: &str)
        -> Result<(), RemoteError>;

    async fn select(
        &self,
        collection: Collection,
        owner: &str,
        selector: &Selector,
    ) -> Result<Vec<Row>, RemoteError>;
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

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn equality_filter() {
        let selector = Selector::new().eq("habit_id", "h-1").eq("date", "2024-03-02");

        assert!(selector.matches(&row(json!({"habit_id": "h-1", "date": "2024-03-02"}))));
        assert!(!selector.matches(&row(json!({"habit_id": "h-2", "date": "2024-03-02"}))));
        assert!(!selector.matches(&row(json!({"habit_id": "h-1"}))));
    }

    #[test]
    fn date_window_is_inclusive() {
        let selector = Selector::new().since("date", date(5)).until("date", date(10));

        assert!(selector.matches(&row(json!({"date": "2024-03-05"}))));
        assert!(selector.matches(&row(json!({"date": "2024-03-10"}))));
        assert!(!selector.matches(&row(json!({"date": "2024-03-04"}))));
        assert!(!selector.matches(&row(json!({"date": "2024-03-11"}))));
        assert!(!selector.matches(&row(json!({"date": "yesterday"}))));
        assert!(!selector.matches(&row(json!({}))));
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(Selector::new().matches(&row(json!({"anything": 1}))));
    }
}
