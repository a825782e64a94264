//! SQLite state store for the onboarding process engine
//!
//! This crate provides sqlx-backed implementations of the process and step
//! repositories defined in onboard-core.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub mod migrations;
pub mod repositories;

pub use repositories::{SqliteProcessRepository, SqliteProcessStepRepository};

use onboard_core::{CoreError, ProcessRepository, ProcessStepRepository};

/// Configuration for the SQLite connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database connection string
    pub connection_string: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Timeout for acquiring a connection from the pool (in seconds)
    pub acquire_timeout_secs: u64,

    /// How long a connection waits for another writer to finish (in seconds)
    pub busy_timeout_secs: u64,

    /// Whether to run migrations on startup
    pub run_migrations: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            connection_string: "sqlite://onboard.db".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 30,
            busy_timeout_secs: 10,
            run_migrations: true,
        }
    }
}

impl SqliteConfig {
    /// Private in-memory database, mostly for tests
    pub fn in_memory() -> Self {
        Self {
            connection_string: "sqlite::memory:".to_string(),
            ..Default::default()
        }
    }

    /// Whether the database only lives inside the connection
    pub fn is_in_memory(&self) -> bool {
        self.connection_string.contains(":memory:") || self.connection_string.contains("mode=memory")
    }
}

/// SQLite connection pool wrapper
#[derive(Debug, Clone)]
pub struct SqliteConnection {
    pool: SqlitePool,
}

impl SqliteConnection {
    /// Connect and, when configured, migrate the schema
    pub async fn new(config: &SqliteConfig) -> Result<Self, CoreError> {
        let mut options = SqliteConnectOptions::from_str(&config.connection_string)
            .map_err(|e| CoreError::ConfigurationError(format!("Invalid SQLite connection string: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        // Readers keep going while one pooled connection writes
        if !config.is_in_memory() {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));

        // Every connection to `:memory:` opens its own database, so keep a
        // single connection alive for the lifetime of the pool
        if config.is_in_memory() {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Failed to connect to SQLite: {}", e)))?;
        debug!("Connected to SQLite database");

        let conn = Self { pool };
        if config.run_migrations {
            conn.run_migrations().await?;
        }
        Ok(conn)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        let applied = migrations::run_migrations(&self.pool).await?;
        info!(applied, "Database migrations complete");
        Ok(())
    }

    /// Get the database connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Provider for SQLite state store repositories
#[derive(Debug, Clone)]
pub struct SqliteStateStoreProvider {
    connection: SqliteConnection,
}

impl SqliteStateStoreProvider {
    /// Create a provider with default configuration
    pub async fn new(connection_string: &str) -> Result<Self, CoreError> {
        let config = SqliteConfig {
            connection_string: connection_string.to_string(),
            ..Default::default()
        };

        Self::with_config(config).await
    }

    /// Create a provider with custom configuration
    pub async fn with_config(config: SqliteConfig) -> Result<Self, CoreError> {
        let connection = SqliteConnection::new(&config).await?;
        Ok(Self { connection })
    }

    /// Underlying connection
    pub fn connection(&self) -> &SqliteConnection {
        &self.connection
    }

    /// Create the process and step repositories
    pub fn create_repositories(
        &self,
    ) -> (Arc<dyn ProcessRepository>, Arc<dyn ProcessStepRepository>) {
        let conn = self.connection.clone();
        let process_repo = Arc::new(SqliteProcessRepository::new(conn.clone()));
        let step_repo = Arc::new(SqliteProcessStepRepository::new(conn));
        (process_repo, step_repo)
    }
}
