//! Error types for the sync engine.

use std::time::Duration;
use thiserror::Error;

/// Whether a failed remote call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection drops, 5xx-equivalents. Retried.
    Transient,
    /// Validation, not-found, conflicts, auth rejections. Never retried.
    Permanent,
}

/// A failure reported by the remote backend for a single call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    // Transient
    #[error("network unavailable: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    // Permanent
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Classify an HTTP-style status code returned by the backend.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => RemoteError::Validation(message),
            401 | 403 => RemoteError::Unauthorized(message),
            404 => RemoteError::NotFound(message),
            409 => RemoteError::Conflict(message),
            _ => RemoteError::Server { status, message },
        }
    }

    /// Default transient/permanent classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => ErrorClass::Transient,
            RemoteError::Server { status, .. } => match status {
                408 | 425 | 429 | 500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            RemoteError::Validation(_)
            | RemoteError::NotFound(_)
            | RemoteError::Conflict(_)
            | RemoteError::Unauthorized(_)
            | RemoteError::Decode(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// A remote operation that did not succeed within its retry budget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("remote operation failed after {attempts} attempt(s): {cause}")]
pub struct RemoteOperationError {
    pub cause: RemoteError,
    pub attempts: u32,
}

impl RemoteOperationError {
    pub fn is_permanent(&self) -> bool {
        !self.cause.is_transient()
    }
}

/// Failures of the local persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode local state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported local state format version: {found} (max supported: {supported})")]
    UnsupportedFormat { found: u32, supported: u32 },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// All errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteOperationError),

    #[error("no authenticated identity")]
    Unauthenticated,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
