use std::sync::Arc;

use onboard_core::{ProcessRepository, ProcessStepRepository};
use onboard_state_inmemory::InMemoryStateStoreProvider;
use onboard_state_sqlite::SqliteStateStoreProvider;
use tracing::info;

use crate::{WorkerConfig, WorkerResult};

/// Process and step stores selected by the configuration
#[derive(Clone)]
pub struct Stores {
    /// Process Store
    pub processes: Arc<dyn ProcessRepository>,
    /// Step Store
    pub steps: Arc<dyn ProcessStepRepository>,
}

/// Open the stores named by `config.database_url`
pub async fn connect_stores(config: &WorkerConfig) -> WorkerResult<Stores> {
    config.validate()?;

    let (processes, steps) = match config.sqlite_config() {
        Some(sqlite_config) => {
            info!(database_url = %sqlite_config.connection_string, "Using SQLite state store");
            SqliteStateStoreProvider::with_config(sqlite_config)
                .await?
                .create_repositories()
        }
        None => {
            info!("Using in-memory state store");
            InMemoryStateStoreProvider::new().create_repositories()
        }
    };

    Ok(Stores { processes, steps })
}
