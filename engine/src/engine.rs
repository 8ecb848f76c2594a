//! The sync engine.
//!
//! A [`SyncEngine`] is a cheap, cloneable handle. It owns the running
//! flag, the auto-sync task and the status channel; the queue itself is
//! owned by the local store and re-read at the start of every drain.
//!
//! ## Cycle
//!
//! 1. Skip if a cycle is already running.
//! 2. Probe connectivity; skip if offline.
//! 3. Resolve the current identity; skip if signed out.
//! 4. Drain the queue in enqueue order. Each operation is applied on its
//!    own: a failure (or panic) is recorded against that operation and the
//!    drain moves on.
//! 5. Refresh the local cache. A failed refresh is logged and does not undo
//!    the drain.
//! 6. Record the last-sync time.
//!
//! The running flag is held by a guard, so it is released on every exit
//! path including panics and cancellation.

use crate::{
    apply::OperationApplier,
    auth::AuthProvider,
    config::SyncConfig,
    error::Result,
    fetcher::RemoteMergeFetcher,
    pending::PendingOperationStore,
    probe::{BackendReachability, ConnectivityCheck, ConnectivityProbe, ConnectivityReport, NetworkState},
    remote::RemoteBackend,
    scheduler::{IntervalTicker, PeriodicTask, Ticker},
    CachedSnapshot, Clock, DeadLetter, Identity, LocalStore, Operation, OperationId,
    PendingOperation, SystemClock,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};

/// Snapshot of the engine's state for the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Verdict of the most recent connectivity probe.
    pub is_online: bool,
    pub has_pending_operations: bool,
    pub operation_count: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub is_syncing: bool,
}

/// Why a cycle ended without draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
    Unauthenticated,
    /// The pending queue could not be read.
    StoreUnavailable,
    /// The cycle panicked outside of any single operation.
    Aborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning => write!(f, "already running"),
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::Unauthenticated => write!(f, "not authenticated"),
            SkipReason::StoreUnavailable => write!(f, "local store unavailable"),
            SkipReason::Aborted => write!(f, "aborted"),
        }
    }
}

/// Outcome of one call to [`SyncEngine::attempt_sync_cycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCycleResult {
    /// Online, authenticated and the drain was attempted.
    pub succeeded: bool,
    pub applied_count: usize,
    /// Operations that failed this cycle, dead-lettered ones included.
    pub failed_count: usize,
    pub dead_lettered_count: usize,
    /// The cache refresh succeeded.
    pub merged: bool,
    pub skipped: Option<SkipReason>,
}

impl SyncCycleResult {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    /// False only when another cycle was already running.
    pub fn started(&self) -> bool {
        self.skipped != Some(SkipReason::AlreadyRunning)
    }
}

enum OpOutcome {
    Applied,
    Failed,
    DeadLettered,
}

/// Holds the running flag for the lifetime of a cycle.
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

struct Inner {
    store: Arc<dyn LocalStore>,
    pending: PendingOperationStore,
    auth: Arc<dyn AuthProvider>,
    probe: ConnectivityProbe,
    network: NetworkState,
    applier: OperationApplier,
    fetcher: RemoteMergeFetcher,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    running: AtomicBool,
    online: AtomicBool,
    status: watch::Sender<SyncStatus>,
    /// Serializes status refreshes so the last one published read the latest state.
    status_refresh: Mutex<()>,
    auto_sync: Mutex<Option<PeriodicTask>>,
}

/// Handle to a sync engine. Clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

pub struct SyncEngineBuilder {
    store: Arc<dyn LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    network: NetworkState,
    checks: Vec<Arc<dyn ConnectivityCheck>>,
}

impl SyncEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a network flag the host already holds.
    pub fn network_state(mut self, network: NetworkState) -> Self {
        self.network = network;
        self
    }

    /// Add a connectivity check on top of the network flag and the backend
    /// health call.
    pub fn with_check(mut self, check: Arc<dyn ConnectivityCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn build(self) -> SyncEngine {
        let mut probe = ConnectivityProbe::new(self.config.probe_timeout)
            .with_check(Arc::new(self.network.clone()))
            .with_check(Arc::new(BackendReachability::new(Arc::clone(&self.backend))));
        for check in self.checks {
            probe = probe.with_check(check);
        }

        let applier = OperationApplier::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.clock),
            self.config.retry.clone(),
        );
        let fetcher = RemoteMergeFetcher::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.retry.clone(),
            self.config.entry_lookback_days,
        );
        let (status, _) = watch::channel(SyncStatus::default());

        SyncEngine {
            inner: Arc::new(Inner {
                pending: PendingOperationStore::new(Arc::clone(&self.store), Arc::clone(&self.clock)),
                store: self.store,
                auth: self.auth,
                probe,
                network: self.network,
                applier,
                fetcher,
                clock: self.clock,
                config: self.config,
                running: AtomicBool::new(false),
                online: AtomicBool::new(false),
                status,
                status_refresh: Mutex::new(()),
                auto_sync: Mutex::new(None),
            }),
        }
    }
}

impl SyncEngine {
    pub fn builder(
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteBackend>,
        auth: Arc<dyn AuthProvider>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            store,
            backend,
            auth,
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
            network: NetworkState::default(),
            checks: Vec::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Queue a local mutation. The mutation is durable once this returns.
    pub async fn enqueue(&self, operation: Operation) -> Result<OperationId> {
        let id = self.inner.pending.enqueue(operation).await?;
        self.refresh_status().await;
        Ok(id)
    }

    pub fn pending(&self) -> &PendingOperationStore {
        &self.inner.pending
    }

    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        Ok(self.inner.pending.list_pending().await?)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.inner.store.dead_letters().await?)
    }

    pub async fn cached_snapshot(&self) -> Result<CachedSnapshot> {
        Ok(self.inner.store.cached_snapshot().await?)
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Current status, re-read from the store.
    pub async fn status(&self) -> SyncStatus {
        self.refresh_status().await
    }

    /// Receiver updated on enqueue and at cycle start and end.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Run the probe and remember its verdict.
    pub async fn check_connectivity(&self) -> ConnectivityReport {
        let report = self.inner.probe.check_connectivity().await;
        self.inner.online.store(report.overall, Ordering::Release);
        report
    }

    /// Update the host-reported network flag.
    ///
    /// Going from unavailable to available runs a cycle and returns its
    /// result.
    pub async fn set_network_available(&self, available: bool) -> Option<SyncCycleResult> {
        let was_available = self.inner.network.set(available);

        if available && !was_available {
            tracing::info!("Network available, starting sync cycle");
            return Some(self.attempt_sync_cycle().await);
        }
        if !available {
            self.inner.online.store(false, Ordering::Release);
            self.refresh_status().await;
        }
        None
    }

    /// Manually requested cycle.
    pub async fn sync_now(&self) -> SyncCycleResult {
        tracing::info!("Manual sync requested");
        self.attempt_sync_cycle().await
    }

    /// Run one sync cycle unless one is already running.
    ///
    /// Never fails: offline, signed-out and store failures are reported
    /// through [`SyncCycleResult::skipped`], per-operation failures through
    /// the counts.
    pub async fn attempt_sync_cycle(&self) -> SyncCycleResult {
        let Some(guard) = RunningGuard::acquire(&self.inner.running) else {
            tracing::debug!("Sync cycle already running, skipping");
            return SyncCycleResult::skipped(SkipReason::AlreadyRunning);
        };
        self.refresh_status().await;

        let result = match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(panic = %panic_message(panic.as_ref()), "Sync cycle aborted");
                SyncCycleResult::skipped(SkipReason::Aborted)
            }
        };

        drop(guard);
        self.refresh_status().await;
        result
    }

    async fn run_cycle(&self) -> SyncCycleResult {
        let inner = &self.inner;

        let report = self.check_connectivity().await;
        if !report.overall {
            tracing::info!(reason = %report.summary(), "Offline, skipping sync cycle");
            return SyncCycleResult::skipped(SkipReason::Offline);
        }

        let Some(identity) = inner.auth.current_identity().await else {
            tracing::info!("No authenticated user, skipping sync cycle");
            return SyncCycleResult::skipped(SkipReason::Unauthenticated);
        };

        let pending = match inner.pending.list_pending().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::error!(error = %err, "Failed to read pending operations");
                return SyncCycleResult::skipped(SkipReason::StoreUnavailable);
            }
        };

        let mut result = SyncCycleResult {
            succeeded: true,
            ..SyncCycleResult::default()
        };

        if pending.is_empty() && !inner.config.refresh_when_idle {
            tracing::debug!("No pending operations");
            self.record_last_sync().await;
            return result;
        }

        for op in &pending {
            match self.apply_one(&identity, op).await {
                OpOutcome::Applied => result.applied_count += 1,
                OpOutcome::Failed => result.failed_count += 1,
                OpOutcome::DeadLettered => {
                    result.failed_count += 1;
                    result.dead_lettered_count += 1;
                }
            }
        }

        // The drain is done; a panic while merging must not discard its counts.
        match AssertUnwindSafe(inner.fetcher.download_latest(&identity))
            .catch_unwind()
            .await
        {
            Ok(Ok(_)) => result.merged = true,
            Ok(Err(err)) => tracing::warn!(error = %err, "Failed to refresh local cache"),
            Err(panic) => {
                tracing::error!(panic = %panic_message(panic.as_ref()), "Cache refresh panicked")
            }
        }

        self.record_last_sync().await;

        tracing::info!(
            user_id = %identity.user_id,
            applied = result.applied_count,
            failed = result.failed_count,
            dead_lettered = result.dead_lettered_count,
            merged = result.merged,
            "Sync cycle finished"
        );
        result
    }

    async fn apply_one(&self, identity: &Identity, op: &PendingOperation) -> OpOutcome {
        let collection = op.operation.collection();
        let kind = op.operation.kind();
        let record_id = op.operation.record_id();

        let applied = AssertUnwindSafe(self.inner.applier.apply(identity, &op.operation))
            .catch_unwind()
            .await;

        let error = match applied {
            Ok(Ok(applied)) => {
                tracing::debug!(op_id = %op.id, %collection, %kind, %record_id, ?applied, "Applied operation");
                if let Err(err) = self.inner.pending.remove(op.id).await {
                    tracing::warn!(
                        op_id = %op.id,
                        error = %err,
                        "Failed to remove applied operation, it will be replayed"
                    );
                }
                return OpOutcome::Applied;
            }
            Ok(Err(err)) => {
                if err.is_permanent() {
                    tracing::error!(
                        op_id = %op.id,
                        %collection,
                        %kind,
                        %record_id,
                        attempts = err.attempts,
                        error = %err.cause,
                        "Operation rejected by backend"
                    );
                } else {
                    tracing::warn!(
                        op_id = %op.id,
                        %collection,
                        %kind,
                        %record_id,
                        attempts = err.attempts,
                        error = %err.cause,
                        "Operation failed, will retry next cycle"
                    );
                }
                err.to_string()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(op_id = %op.id, %collection, %kind, %record_id, panic = %message, "Applier panicked");
                format!("applier panicked: {message}")
            }
        };

        self.note_failure(op, &error).await
    }

    async fn note_failure(&self, op: &PendingOperation, error: &str) -> OpOutcome {
        let inner = &self.inner;

        let failed_cycles = match inner.pending.record_failure(op.id, error).await {
            Ok(Some(attempts)) => attempts,
            Ok(None) => return OpOutcome::Failed,
            Err(err) => {
                tracing::warn!(op_id = %op.id, error = %err, "Failed to record operation failure");
                op.attempts.saturating_add(1)
            }
        };

        if !inner.config.dead_letter.should_dead_letter(failed_cycles) {
            return OpOutcome::Failed;
        }

        match inner.pending.dead_letter(op.id, error).await {
            Ok(true) => {
                tracing::error!(
                    op_id = %op.id,
                    collection = %op.operation.collection(),
                    failed_cycles,
                    error,
                    "Dead-lettered operation"
                );
                OpOutcome::DeadLettered
            }
            Ok(false) => OpOutcome::Failed,
            Err(err) => {
                tracing::warn!(op_id = %op.id, error = %err, "Failed to dead-letter operation");
                OpOutcome::Failed
            }
        }
    }

    async fn record_last_sync(&self) {
        let now = self.inner.clock.now();
        if let Err(err) = self.inner.store.set_last_sync(now).await {
            tracing::warn!(error = %err, "Failed to record last sync time");
        }
    }

    async fn refresh_status(&self) -> SyncStatus {
        let inner = &self.inner;
        let _refreshing = inner.status_refresh.lock().await;
        let previous = inner.status.borrow().clone();

        let operation_count = match inner.pending.count().await {
            Ok(count) => count,
            Err(err) => {
                tracing::debug!(error = %err, "Failed to count pending operations");
                previous.operation_count
            }
        };
        let last_sync = inner.store.last_sync().await.unwrap_or(previous.last_sync);

        let status = SyncStatus {
            is_online: inner.online.load(Ordering::Acquire),
            has_pending_operations: operation_count > 0,
            operation_count,
            last_sync,
            is_syncing: inner.running.load(Ordering::Acquire),
        };

        inner.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        status
    }

    /// Arm the periodic timer at the configured interval. Runs one cycle
    /// immediately. A no-op if auto-sync is already running.
    pub async fn start_auto_sync(&self) {
        let interval = self.inner.config.sync_interval;
        if self
            .start_auto_sync_with(IntervalTicker::new(interval))
            .await
        {
            tracing::info!(interval_secs = interval.as_secs(), "Auto-sync started");
        }
    }

    /// Arm auto-sync on a custom ticker. Returns `false` if already armed.
    pub async fn start_auto_sync_with<T: Ticker + 'static>(&self, ticker: T) -> bool {
        let mut slot = self.inner.auto_sync.lock().await;
        if slot.is_some() {
            tracing::debug!("Auto-sync already running");
            return false;
        }

        // The task must not keep the engine alive.
        let engine: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = PeriodicTask::spawn(ticker, true, move || {
            let engine = engine.clone();
            async move {
                if let Some(inner) = engine.upgrade() {
                    SyncEngine { inner }.attempt_sync_cycle().await;
                }
            }
        });

        *slot = Some(task);
        true
    }

    pub async fn is_auto_syncing(&self) -> bool {
        self.inner.auto_sync.lock().await.is_some()
    }

    /// Disarm the timer. Waits for an in-flight timer cycle to finish; safe
    /// to call when nothing is armed.
    pub async fn stop_auto_sync(&self) {
        let task = self.inner.auto_sync.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
            tracing::info!("Auto-sync stopped");
        }
    }

    /// Stop auto-sync and wait for any running cycle to finish.
    pub async fn shutdown(&self) {
        self.stop_auto_sync().await;

        let mut status = self.subscribe();
        while self.is_syncing() {
            if status.changed().await.is_err() {
                break;
            }
        }
        tracing::debug!("Sync engine shut down");
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("probe", &self.inner.probe)
            .field("running", &self.is_syncing())
            .finish_non_exhaustive()
    }
}
