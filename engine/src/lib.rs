//! # Habit Sync Engine
//!
//! An offline-first sync engine for habit tracking data.
//!
//! Local mutations are captured as typed operations in a durable queue.
//! When the device is online and a user is signed in, the engine replays
//! the queue against the remote backend in order, then refreshes a local
//! cache of the server of record so the application can keep serving reads
//! offline.
//!
//! ## Core Concepts
//!
//! ### Operations
//!
//! Every change is an [`Operation`]: a habit, category or entry create,
//! update or delete, each with its own payload type. Queued operations are
//! [`PendingOperation`]s and are removed only once the remote backend has
//! confirmed them (at-least-once delivery).
//!
//! ### Collaborators
//!
//! - [`LocalStore`] persists the queue, the cached snapshot and the
//!   last-sync time ([`MemoryStore`], [`FileStore`]).
//! - [`RemoteBackend`] is owner-scoped CRUD over the remote tables
//!   ([`MemoryBackend`] here; the agent crate ships an HTTP client).
//! - [`AuthProvider`] supplies the signed-in [`Identity`].
//!
//! ### Sync cycle
//!
//! [`SyncEngine::attempt_sync_cycle`] probes connectivity, checks the
//! identity, drains the queue through the collection appliers (each remote
//! call under a [`RetryPolicy`]) and finally runs the
//! [`RemoteMergeFetcher`]. At most one cycle runs at a time.
//!
//! ## Quick Start
//!
//! ```rust
//! use habit_sync_engine::{
//!     HabitOp, Identity, MemoryBackend, MemoryStore, NewHabit, Operation, StaticAuth,
//!     SyncEngine,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let backend = Arc::new(MemoryBackend::new());
//! let engine = SyncEngine::builder(
//!     Arc::new(MemoryStore::new()),
//!     backend.clone(),
//!     Arc::new(StaticAuth::signed_in(Identity::new("user-1"))),
//! )
//! .build();
//!
//! engine
//!     .enqueue(Operation::Habit(HabitOp::Create(NewHabit::new("habit-1", "Read"))))
//!     .await
//!     .unwrap();
//!
//! let result = engine.attempt_sync_cycle().await;
//! assert!(result.succeeded);
//! assert_eq!(result.applied_count, 1);
//! assert!(!engine.status().await.has_pending_operations);
//! # }
//! ```

pub mod apply;
pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod file_store;
pub mod memory_remote;
pub mod operation;
pub mod pending;
pub mod probe;
pub mod record;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use apply::{Applied, OperationApplier};
pub use auth::{AuthProvider, Identity, StaticAuth};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DeadLetterPolicy, SyncConfig};
pub use engine::{SkipReason, SyncCycleResult, SyncEngine, SyncEngineBuilder, SyncStatus};
pub use error::{Error, ErrorClass, RemoteError, RemoteOperationError, Result, StoreError};
pub use fetcher::{MergeSummary, RemoteMergeFetcher};
pub use file_store::FileStore;
pub use memory_remote::MemoryBackend;
pub use operation::{
    CategoryChanges, CategoryOp, DeadLetter, EntryChanges, EntryOp, HabitChanges, HabitOp,
    NewCategory, NewEntry, NewHabit, Operation, OperationId, OperationKind, PendingOperation,
};
pub use pending::PendingOperationStore;
pub use probe::{
    BackendReachability, CheckResult, ConnectivityCheck, ConnectivityProbe, ConnectivityReport,
    NetworkState,
};
pub use record::{Category, Collection, Entry, Habit};
pub use remote::{DateRange, RemoteBackend, Selector, OWNER_COLUMN};
pub use retry::{with_retry, Classifier, RetryPolicy};
pub use scheduler::{manual, IntervalTicker, ManualTicker, ManualTrigger, PeriodicTask, Tick, Ticker};
pub use snapshot::{CachedSnapshot, LocalState, STATE_FORMAT_VERSION};
pub use store::{LocalStore, MemoryStore};

/// Type aliases for clarity
pub type RecordId = String;
pub type UserId = String;
/// A remote row: a JSON object keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;
