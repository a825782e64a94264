//! Configuration for the process worker
//!
//! Defaults suit local development; every field can be overridden through
//! an `ONBOARD_*` environment variable.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};
use onboard_state_sqlite::SqliteConfig;

/// Database URL selecting the in-memory stores
pub const IN_MEMORY_DATABASE_URL: &str = "memory://local";

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// `memory://local` or a `sqlite:` connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Pause between two passes over pending processes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a process lock taken by this worker stays valid
    #[serde(default = "default_lock_expiry_secs")]
    pub lock_expiry_secs: u64,

    /// Processes executed at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Upper bound of processes picked up by one pass
    #[serde(default = "default_max_processes_per_pass")]
    pub max_processes_per_pass: usize,

    /// Default log filter when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON logs instead of pretty ones
    #[serde(default)]
    pub log_json: bool,
}

fn default_database_url() -> String {
    IN_MEMORY_DATABASE_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_lock_expiry_secs() -> u64 {
    300
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_processes_per_pass() -> usize {
    100
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn parse_or_warn<T: std::str::FromStr>(name: &str, value: &str, target: &mut T) {
    match value.parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("Invalid {} value: {}", name, value),
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn load() -> WorkerResult<Self> {
        Self::load_from(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn load_from<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ONBOARD_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(value) = lookup("ONBOARD_POLL_INTERVAL_MS") {
            parse_or_warn("ONBOARD_POLL_INTERVAL_MS", &value, &mut config.poll_interval_ms);
        }
        if let Some(value) = lookup("ONBOARD_LOCK_EXPIRY_SECS") {
            parse_or_warn("ONBOARD_LOCK_EXPIRY_SECS", &value, &mut config.lock_expiry_secs);
        }
        if let Some(value) = lookup("ONBOARD_MAX_CONCURRENCY") {
            parse_or_warn("ONBOARD_MAX_CONCURRENCY", &value, &mut config.max_concurrency);
        }
        if let Some(value) = lookup("ONBOARD_MAX_PROCESSES_PER_PASS") {
            parse_or_warn(
                "ONBOARD_MAX_PROCESSES_PER_PASS",
                &value,
                &mut config.max_processes_per_pass,
            );
        }
        if let Some(filter) = lookup("ONBOARD_LOG_FILTER") {
            config.log_filter = filter;
        }
        if let Some(value) = lookup("ONBOARD_LOG_JSON") {
            config.log_json = value.eq_ignore_ascii_case("true") || value == "1";
        }

        config.validate()?;
        info!(database_url = %config.database_url, "Loaded worker configuration");
        Ok(config)
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrency == 0 {
            return Err(WorkerError::ConfigError(
                "ONBOARD_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(WorkerError::ConfigError(
                "ONBOARD_POLL_INTERVAL_MS must be at least 1".to_string(),
            ));
        }
        if self.database_url != IN_MEMORY_DATABASE_URL && !self.database_url.starts_with("sqlite:") {
            return Err(WorkerError::ConfigError(format!(
                "Unsupported database URL: {}",
                self.database_url
            )));
        }
        Ok(())
    }

    /// Pause between two passes
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lifetime of a process lock
    pub fn lock_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_expiry_secs.min(u64::from(u32::MAX)) as i64)
    }

    /// SQLite settings, unless the in-memory stores are selected
    pub fn sqlite_config(&self) -> Option<SqliteConfig> {
        if self.database_url == IN_MEMORY_DATABASE_URL {
            return None;
        }
        Some(SqliteConfig {
            connection_string: self.database_url.clone(),
            max_connections: u32::try_from(self.max_concurrency.max(1)).unwrap_or(u32::MAX),
            ..Default::default()
        })
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            poll_interval_ms: default_poll_interval_ms(),
            lock_expiry_secs: default_lock_expiry_secs(),
            max_concurrency: default_max_concurrency(),
            max_processes_per_pass: default_max_processes_per_pass(),
            log_filter: default_log_filter(),
            log_json: false,
        }
    }
}
