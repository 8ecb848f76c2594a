//! Connectivity probe.
//!
//! A probe runs every registered [`ConnectivityCheck`] concurrently, each
//! bounded by the probe timeout, and ANDs the results. A check that times
//! out fails; it never aborts the probe.

use crate::remote::RemoteBackend;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One lightweight reachability check.
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries a short human-readable reason.
    async fn check(&self) -> Result<(), String>;
}

/// Host-reported network availability.
///
/// Cloning shares the flag, so the host can keep a handle and flip it when
/// the OS reports a change.
#[derive(Debug, Clone)]
pub struct NetworkState(Arc<AtomicBool>);

impl NetworkState {
    pub fn new(available: bool) -> Self {
        Self(Arc::new(AtomicBool::new(available)))
    }

    /// Set availability, returning the previous value.
    pub fn set(&self, available: bool) -> bool {
        self.0.swap(available, Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConnectivityCheck for NetworkState {
    fn name(&self) -> &str {
        "network"
    }

    async fn check(&self) -> Result<(), String> {
        if self.is_available() {
            Ok(())
        } else {
            Err("network reported unavailable".to_string())
        }
    }
}

/// Calls the backend's health endpoint.
pub struct BackendReachability {
    backend: Arc<dyn RemoteBackend>,
}

impl BackendReachability {
    pub fn new(backend: Arc<dyn RemoteBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ConnectivityCheck for BackendReachability {
    fn name(&self) -> &str {
        "backend"
    }

    async fn check(&self) -> Result<(), String> {
        self.backend.health_check().await.map_err(|e| e.to_string())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
    pub elapsed: Duration,
}

/// Aggregate verdict of a probe run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityReport {
    /// Logical AND of every check. True when no checks are registered.
    pub overall: bool,
    pub checks: Vec<CheckResult>,
}

impl ConnectivityReport {
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Failure details joined for logging.
    pub fn summary(&self) -> String {
        self.failures()
            .map(|c| match &c.detail {
                Some(detail) => format!("{}: {}", c.name, detail),
                None => c.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct ConnectivityProbe {
    checks: Vec<Arc<dyn ConnectivityCheck>>,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            checks: Vec::new(),
            timeout,
        }
    }

    pub fn with_check(mut self, check: Arc<dyn ConnectivityCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run all checks. Read-only: touches neither local nor remote state.
    pub async fn check_connectivity(&self) -> ConnectivityReport {
        let runs = self.checks.iter().map(|check| {
            let check = Arc::clone(check);
            let limit = self.timeout;
            async move {
                let started = Instant::now();
                let outcome = tokio::time::timeout(limit, check.check()).await;
                let (passed, detail) = match outcome {
                    Ok(Ok(())) => (true, None),
                    Ok(Err(reason)) => (false, Some(reason)),
                    Err(_) => (false, Some(format!("timed out after {limit:?}"))),
                };
                CheckResult {
                    name: check.name().to_string(),
                    passed,
                    detail,
                    elapsed: started.elapsed(),
                }
            }
        });

        let checks = join_all(runs).await;
        let report = ConnectivityReport {
            overall: checks.iter().all(|c| c.passed),
            checks,
        };

        if !report.overall {
            tracing::debug!(failed = %report.summary(), "Connectivity check failed");
        }
        report
    }
}

impl std::fmt::Debug for ConnectivityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.checks.iter().map(|c| c.name()).collect();
        f.debug_struct("ConnectivityProbe")
            .field("checks", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}
