//! Habit Sync Agent - hosts the sync engine against a PostgREST backend.
//!
//! The agent keeps the pending queue and the cached snapshot in a JSON
//! state file, replays the queue on a timer and refreshes the cache after
//! each drain. Configuration comes from the environment (see [`Config`]).

pub mod config;
pub mod error;
pub mod rest;

pub use crate::config::{Config, ConfigError};
pub use crate::error::{AppError, Result};
pub use crate::rest::RestBackend;

use habit_sync_engine::{FileStore, StaticAuth, SyncCycleResult, SyncEngine, SyncStatus};
use std::sync::Arc;
use tokio::sync::watch;

/// Wire the file store, the REST backend and the configured identity into an engine.
pub async fn build_engine(config: &Config) -> Result<SyncEngine> {
    let store = Arc::new(FileStore::open(&config.state_path).await?);
    let backend = Arc::new(
        RestBackend::new(&config.backend_url, &config.api_key, config.request_timeout)?
            .with_access_token(config.access_token.clone()),
    );

    let auth = match config.identity() {
        Some(identity) => {
            tracing::info!(user_id = %identity.user_id, "Syncing as configured user");
            StaticAuth::signed_in(identity)
        }
        None => {
            tracing::warn!("HABIT_SYNC_USER_ID is not set; sync cycles will be skipped");
            StaticAuth::signed_out()
        }
    };

    Ok(SyncEngine::builder(store, backend, Arc::new(auth))
        .config(config.sync_config())
        .build())
}

/// Run the agent until `shutdown` resolves (or a single cycle with `run_once`).
pub async fn run<F>(config: Config, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    let engine = build_engine(&config).await?;

    if config.run_once {
        let result = engine.sync_now().await;
        log_cycle(&result);
        return Ok(());
    }

    let mut status = engine.subscribe();
    engine.start_auto_sync().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                log_status(&status);
            }
        }
    }

    tracing::info!("Shutting down, waiting for any running cycle");
    engine.shutdown().await;
    Ok(())
}

fn log_status(status: &watch::Receiver<SyncStatus>) {
    let status = status.borrow().clone();
    if status.is_syncing {
        tracing::debug!("Sync cycle started");
        return;
    }
    tracing::info!(
        online = status.is_online,
        pending = status.operation_count,
        last_sync = ?status.last_sync,
        "Sync status"
    );
}

fn log_cycle(result: &SyncCycleResult) {
    match &result.skipped {
        Some(reason) => tracing::warn!(%reason, "Sync cycle skipped"),
        None => tracing::info!(
            succeeded = result.succeeded,
            applied = result.applied_count,
            failed = result.failed_count,
            dead_lettered = result.dead_lettered_count,
            merged = result.merged,
            "Sync cycle finished"
        ),
    }
}
