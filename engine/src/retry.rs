//! Bounded retry with exponential backoff for remote calls.
//!
//! A [`RetryPolicy`] is a plain value: attempt budget, backoff shape, an
//! optional per-attempt timeout and the classifier that decides which
//! failures are worth another attempt. [`with_retry`] holds no state across
//! calls, so independent operations may retry concurrently.

use crate::error::{ErrorClass, RemoteError, RemoteOperationError};
use std::future::Future;
use std::time::Duration;

/// Decides whether a failure is transient or permanent.
pub type Classifier = fn(&RemoteError) -> ErrorClass;

/// How a remote operation is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Treated as at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Growth factor applied per further attempt.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Bound on each individual attempt; a timed-out attempt is transient.
    pub attempt_timeout: Option<Duration>,
    pub classify: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            attempt_timeout: Some(Duration::from_secs(15)),
            classify: RemoteError::class,
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            attempt_timeout: None,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `operation` under `policy`.
///
/// Transient failures are retried until the attempt budget is spent;
/// permanent failures return immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RemoteOperationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RemoteError::Timeout(limit)),
            },
            None => operation().await,
        };

        let cause = match outcome {
            Ok(value) => return Ok(value),
            Err(cause) => cause,
        };

        if (policy.classify)(&cause) == ErrorClass::Permanent {
            return Err(RemoteOperationError {
                cause,
                attempts: attempt,
            });
        }

        if attempt >= max_attempts {
            return Err(RemoteOperationError {
                cause,
                attempts: attempt,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "Retrying remote operation"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
