//! Operation types for expressing local mutations.
//!
//! Every mutation the application makes is captured as an [`Operation`]
//! before it is confirmed remotely. Operations are a sum over the three
//! collections, each with its own strongly-typed payload, so routing an
//! operation to its applier is an exhaustive `match`.

use crate::{Collection, RecordId, Row};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique, time-ordered identifier of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of mutation, independent of collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Serialize a payload struct into a remote row, dropping unset fields.
pub(crate) fn to_row<T: Serialize>(value: &T) -> Row {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => Row::new(),
    }
}

/// Full record for a habit create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHabit {
    /// Client-generated id, so later operations can reference the record.
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_per_day: Option<u32>,
}

impl NewHabit {
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            category_id: None,
            color: None,
            icon: None,
            target_per_day: None,
        }
    }

    pub fn with_category(mut self, category_id: impl Into<RecordId>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    /// The same fields expressed as an update, minus the id.
    pub fn as_changes(&self) -> HabitChanges {
        HabitChanges {
            name: Some(self.name.clone()),
            description: self.description.clone(),
            category_id: self.category_id.clone(),
            color: self.color.clone(),
            icon: self.icon.clone(),
            target_per_day: self.target_per_day,
            is_active: Some(true),
        }
    }
}

/// Changed fields of a habit. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HabitChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl HabitChanges {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Full record for a category create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCategory {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NewCategory {
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
            icon: None,
        }
    }

    pub fn as_changes(&self) -> CategoryChanges {
        CategoryChanges {
            name: Some(self.name.clone()),
            color: self.color.clone(),
            icon: self.icon.clone(),
        }
    }
}

/// Changed fields of a category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Full record for an entry create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub id: RecordId,
    pub habit_id: RecordId,
    pub date: NaiveDate,
    pub completed: bool,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_count() -> u32 {
    1
}

impl NewEntry {
    pub fn completed(
        id: impl Into<RecordId>,
        habit_id: impl Into<RecordId>,
        date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            habit_id: habit_id.into(),
            date,
            completed: true,
            count: 1,
            notes: None,
        }
    }

    /// The completion fields, used when the (habit, date) row already exists.
    pub fn completion_changes(&self) -> EntryChanges {
        EntryChanges {
            completed: Some(self.completed),
            count: Some(self.count),
            notes: self.notes.clone(),
        }
    }
}

/// Changed completion fields of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A habit mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HabitOp {
    Create(NewHabit),
    Update { id: RecordId, changes: HabitChanges },
    /// Soft delete: the habit is marked inactive remotely.
    Delete { id: RecordId },
}

/// A category mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CategoryOp {
    Create(NewCategory),
    Update {
        id: RecordId,
        changes: CategoryChanges,
    },
    Delete {
        id: RecordId,
    },
}

/// An entry mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntryOp {
    Create(NewEntry),
    Update { id: RecordId, changes: EntryChanges },
    Delete { id: RecordId },
}

/// A local mutation awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "change", rename_all = "lowercase")]
pub enum Operation {
    Habit(HabitOp),
    Category(CategoryOp),
    Entry(EntryOp),
}

impl Operation {
    /// Get the collection this operation targets.
    pub fn collection(&self) -> Collection {
        match self {
            Operation::Habit(_) => Collection::Habits,
            Operation::Category(_) => Collection::Categories,
            Operation::Entry(_) => Collection::Entries,
        }
    }

    /// Get the kind of mutation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Habit(HabitOp::Create(_))
            | Operation::Category(CategoryOp::Create(_))
            | Operation::Entry(EntryOp::Create(_)) => OperationKind::Create,
            Operation::Habit(HabitOp::Update { .. })
            | Operation::Category(CategoryOp::Update { .. })
            | Operation::Entry(EntryOp::Update { .. }) => OperationKind::Update,
            Operation::Habit(HabitOp::Delete { .. })
            | Operation::Category(CategoryOp::Delete { .. })
            | Operation::Entry(EntryOp::Delete { .. }) => OperationKind::Delete,
        }
    }

    /// Get the record ID this operation targets.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Operation::Habit(HabitOp::Create(new)) => &new.id,
            Operation::Habit(HabitOp::Update { id, .. } | HabitOp::Delete { id }) => id,
            Operation::Category(CategoryOp::Create(new)) => &new.id,
            Operation::Category(CategoryOp::Update { id, .. } | CategoryOp::Delete { id }) => id,
            Operation::Entry(EntryOp::Create(new)) => &new.id,
            Operation::Entry(EntryOp::Update { id, .. } | EntryOp::Delete { id }) => id,
        }
    }
}

/// An operation as held in the pending queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    /// Ordering and diagnostics only; never used for conflict resolution.
    pub enqueued_at: DateTime<Utc>,
    pub operation: Operation,
    /// Number of cycles in which applying this operation failed.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(operation: Operation, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: OperationId::new(),
            enqueued_at,
            operation,
            attempts: 0,
            last_error: None,
        }
    }
}

/// An operation that was given up on under a drop-after-N policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub pending: PendingOperation,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn operation_accessors() {
        let create = Operation::Habit(HabitOp::Create(NewHabit::new("h-1", "Read")));
        assert_eq!(create.collection(), Collection::Habits);
        assert_eq!(create.kind(), OperationKind::Create);
        assert_eq!(create.record_id(), "h-1");

        let update = Operation::Category(CategoryOp::Update {
            id: "c-1".into(),
            changes: CategoryChanges::default(),
        });
        assert_eq!(update.collection(), Collection::Categories);
        assert_eq!(update.kind(), OperationKind::Update);
        assert_eq!(update.record_id(), "c-1");

        let delete = Operation::Entry(EntryOp::Delete { id: "e-1".into() });
        assert_eq!(delete.collection(), Collection::Entries);
        assert_eq!(delete.kind(), OperationKind::Delete);
    }

    #[test]
    fn changes_serialize_only_set_fields() {
        let row = to_row(&HabitChanges::rename("Read more"));
        assert_eq!(serde_json::Value::Object(row), json!({"name": "Read more"}));

        let row = to_row(&EntryChanges {
            completed: Some(false),
            ..EntryChanges::default()
        });
        assert_eq!(serde_json::Value::Object(row), json!({"completed": false}));
    }

    #[test]
    fn new_entry_row_and_completion_changes() {
        let entry = NewEntry::completed("e-1", "h-1", date(5));
        let row = to_row(&entry);
        assert_eq!(row["date"], json!("2024-03-05"));
        assert_eq!(row["habit_id"], json!("h-1"));
        assert!(!row.contains_key("notes"));

        let changes = entry.completion_changes();
        assert_eq!(changes.completed, Some(true));
        assert_eq!(changes.count, Some(1));
    }

    #[test]
    fn new_habit_as_changes_reactivates() {
        let habit = NewHabit::new("h-1", "Run").with_category("c-1");
        let changes = habit.as_changes();
        assert_eq!(changes.name.as_deref(), Some("Run"));
        assert_eq!(changes.category_id.as_deref(), Some("c-1"));
        assert_eq!(changes.is_active, Some(true));
    }

    #[test]
    fn serialization_is_tagged() {
        let op = Operation::Habit(HabitOp::Update {
            id: "h-1".into(),
            changes: HabitChanges::rename("Walk"),
        });

        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["collection"], "habit");
        assert_eq!(value["change"]["kind"], "update");
        assert_eq!(value["change"]["changes"]["name"], "Walk");

        let parsed: Operation = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn pending_operation_ids_are_time_ordered() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let a = PendingOperation::new(Operation::Entry(EntryOp::Delete { id: "e".into() }), at);
        let b = PendingOperation::new(Operation::Entry(EntryOp::Delete { id: "e".into() }), at);
        assert_ne!(a.id, b.id);
        assert!(a.id < b.id);
        assert_eq!(a.attempts, 0);
    }

    #[test]
    fn pending_operation_tolerates_missing_diagnostics() {
        let value = json!({
            "id": "0190a5f2-8f3c-7c2e-9a4b-1c2d3e4f5a6b",
            "enqueued_at": "2024-03-01T00:00:00Z",
            "operation": {"collection": "entry", "change": {"kind": "delete", "id": "e-1"}}
        });
        let pending: PendingOperation = serde_json::from_value(value).unwrap();
        assert_eq!(pending.attempts, 0);
        assert_eq!(pending.last_error, None);
    }
}
