use sqlx::SqlitePool;
use tracing::debug;

use onboard_core::CoreError;

/// Generate SQL migrations for the SQLite state store
///
/// Steps carry an autoincrement `seq` column; it defines creation order
/// independently of clock resolution.
pub fn generate_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "20240401000000_initial_schema",
            r#"
            CREATE TABLE IF NOT EXISTS processes (
                id TEXT PRIMARY KEY,
                process_type_id TEXT NOT NULL,
                lock_expiry_date TEXT NULL,
                version TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS process_steps (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                process_id TEXT NOT NULL REFERENCES processes(id) ON DELETE CASCADE,
                process_step_type_id TEXT NOT NULL,
                status TEXT NOT NULL,
                date_created TEXT NOT NULL,
                date_last_changed TEXT NULL,
                message TEXT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_process_steps_process_id ON process_steps(process_id, seq);
            "#,
        ),
        (
            "20240402000000_pending_step_index",
            r#"
            CREATE INDEX IF NOT EXISTS idx_process_steps_status ON process_steps(status, seq);
            CREATE INDEX IF NOT EXISTS idx_processes_process_type_id ON processes(process_type_id);
            "#,
        ),
    ]
}

/// Apply every migration not yet recorded in `schema_migrations`
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize, CoreError> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
    )
    .execute(pool)
    .await
    .map_err(|e| CoreError::StateStoreError(format!("Failed to create migrations table: {}", e)))?;

    let mut applied = 0;
    for (version, sql) in generate_migrations() {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?1")
                .bind(version)
                .fetch_optional(pool)
                .await
                .map_err(|e| CoreError::StateStoreError(format!("Failed to read migrations: {}", e)))?;
        if exists.is_some() {
            continue;
        }

        debug!(version, "Applying migration");
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Failed to begin migration: {}", e)))?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Migration {} failed: {}", version, e)))?;
        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
            .bind(version)
            .bind(chrono::Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Failed to record migration: {}", e)))?;
        tx.commit()
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Failed to commit migration: {}", e)))?;
        applied += 1;
    }

    Ok(applied)
}
