//! Configuration management for the agent.

use habit_sync_engine::{DeadLetterPolicy, Identity, SyncConfig};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_STATE_PATH: &str = "habit-sync-state.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
/// Upper bound for `HABIT_SYNC_LOOKBACK_DAYS` (about a century).
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the PostgREST deployment, without the `/rest/v1` suffix
    pub backend_url: String,
    /// Project API key sent as the `apikey` header
    pub api_key: String,
    /// User access token; the API key is used as bearer when absent
    pub access_token: Option<String>,
    /// Signed-in user. Cycles are skipped while unset.
    pub user_id: Option<String>,
    /// Location of the persisted queue and cache
    pub state_path: PathBuf,
    pub sync_interval: Option<Duration>,
    pub lookback_days: Option<u32>,
    pub max_attempts: Option<u32>,
    pub dead_letter_after: Option<u32>,
    pub refresh_when_idle: bool,
    /// Run a single cycle and exit
    pub run_once: bool,
    /// Whole-request timeout for the HTTP client
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = var("HABIT_SYNC_BACKEND_URL").ok_or(ConfigError::MissingBackendUrl)?;
        if !(backend_url.starts_with("http://") || backend_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(backend_url));
        }
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let api_key = var("HABIT_SYNC_API_KEY").ok_or(ConfigError::MissingApiKey)?;

        let state_path = var("HABIT_SYNC_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));

        let sync_interval = parse::<u64>(&var, "HABIT_SYNC_INTERVAL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let lookback_days = parse::<u32>(&var, "HABIT_SYNC_LOOKBACK_DAYS")?;
        if let Some(days) = lookback_days.filter(|days| *days > MAX_LOOKBACK_DAYS) {
            return Err(ConfigError::OutOfRange {
                var: "HABIT_SYNC_LOOKBACK_DAYS",
                value: days.to_string(),
                max: MAX_LOOKBACK_DAYS.to_string(),
            });
        }

        let request_timeout = parse::<u64>(&var, "HABIT_SYNC_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        Ok(Self {
            backend_url,
            api_key,
            access_token: var("HABIT_SYNC_ACCESS_TOKEN"),
            user_id: var("HABIT_SYNC_USER_ID"),
            state_path,
            sync_interval,
            lookback_days,
            max_attempts: parse(&var, "HABIT_SYNC_MAX_ATTEMPTS")?,
            dead_letter_after: parse(&var, "HABIT_SYNC_DEAD_LETTER_AFTER")?,
            refresh_when_idle: flag(&var, "HABIT_SYNC_REFRESH_WHEN_IDLE")?,
            run_once: flag(&var, "HABIT_SYNC_ONCE")?,
            request_timeout,
        })
    }

    /// Engine settings, starting from the engine defaults.
    pub fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::default().with_refresh_when_idle(self.refresh_when_idle);

        if let Some(interval) = self.sync_interval {
            config = config.with_sync_interval(interval);
        }
        if let Some(days) = self.lookback_days {
            config = config.with_entry_lookback_days(days);
        }
        if let Some(attempts) = self.max_attempts {
            let retry = config.retry.clone().with_max_attempts(attempts);
            config = config.with_retry(retry);
        }
        if let Some(cycles) = self.dead_letter_after {
            config = config.with_dead_letter(DeadLetterPolicy::DropAfter(cycles));
        }
        config
    }

    /// The identity to sync as, if a user is configured.
    pub fn identity(&self) -> Option<Identity> {
        let user_id = self.user_id.clone()?;
        let identity = Identity::new(user_id);
        Some(match &self.access_token {
            Some(token) => identity.with_token(token.clone()),
            None => identity,
        })
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(key)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                var: key,
                value: value.clone(),
            })
        })
        .transpose()
}

fn flag(var: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match var(key) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { var: key, value }),
        },
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HABIT_SYNC_BACKEND_URL environment variable is required")]
    MissingBackendUrl,

    #[error("HABIT_SYNC_API_KEY environment variable is required")]
    MissingApiKey,

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid {var} value: {value}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Invalid {var} value: {value} (at most {max})")]
    OutOfRange {
        var: &'static str,
        value: String,
        max: String,
    },

    #[error("Invalid {var} value: {value} (expected true or false)")]
    InvalidFlag { var: &'static str, value: String },
}
