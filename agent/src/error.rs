//! Unified error handling for the agent.

use crate::config::ConfigError;
use habit_sync_engine::StoreError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, AppError>;
