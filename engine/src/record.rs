//! Domain records held in the local cache.
//!
//! Records are decoded from remote rows. Unknown row columns (such as the
//! owner column) are ignored.

use crate::RecordId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The remote collections the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Habits,
    Categories,
    Entries,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Habits,
        Collection::Categories,
        Collection::Entries,
    ];

    /// Remote table name.
    pub fn table_name(self) -> &'static str {
        match self {
            Collection::Habits => "habits",
            Collection::Categories => "categories",
            Collection::Entries => "habit_entries",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::Habits => write!(f, "habits"),
            Collection::Categories => write!(f, "categories"),
            Collection::Entries => write!(f, "entries"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_count() -> u32 {
    1
}

/// A habit the user is tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<RecordId>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "default_count")]
    pub target_per_day: u32,
    /// Soft delete flag. Inactive habits keep their entry history valid.
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A user-defined grouping of habits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Completion of one habit on one day. Unique per (habit, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: RecordId,
    pub habit_id: RecordId,
    pub date: NaiveDate,
    #[serde(default)]
    pub completed: bool,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Habit {
    pub fn is_active(&self) -> bool {
        self.is_active
    }
}
