use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use onboard_core::{
    CoreError, Process, ProcessId, ProcessRepository, ProcessStep, ProcessStepId,
    ProcessStepRepository, ProcessStepStatus, ProcessStepTypeId, ProcessTypeId, StepModifier,
};

use crate::SqliteConnection;

const STEP_COLUMNS: &str =
    "id, process_id, process_step_type_id, status, date_created, date_last_changed, message";

const PROCESS_COLUMNS: &str = "id, process_type_id, lock_expiry_date, version";

fn store_error(action: &str, e: sqlx::Error) -> CoreError {
    CoreError::StateStoreError(format!("Failed to {}: {}", action, e))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, CoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| CoreError::SerializationError(format!("Error getting {}: {}", name, e)))
}

fn step_from_row(row: &SqliteRow) -> Result<ProcessStep, CoreError> {
    let status: String = column(row, "status")?;
    Ok(ProcessStep {
        id: ProcessStepId(column(row, "id")?),
        process_step_type_id: ProcessStepTypeId(column(row, "process_step_type_id")?),
        status: status.parse::<ProcessStepStatus>()?,
        process_id: ProcessId(column(row, "process_id")?),
        date_created: column(row, "date_created")?,
        date_last_changed: column(row, "date_last_changed")?,
        message: column(row, "message")?,
    })
}

fn process_from_row(row: &SqliteRow) -> Result<Process, CoreError> {
    Ok(Process {
        id: ProcessId(column(row, "id")?),
        process_type_id: ProcessTypeId(column(row, "process_type_id")?),
        lock_expiry_date: column(row, "lock_expiry_date")?,
        version: column(row, "version")?,
    })
}

/// SQLite implementation of the ProcessStepRepository
#[derive(Debug, Clone)]
pub struct SqliteProcessStepRepository {
    conn: SqliteConnection,
}

impl SqliteProcessStepRepository {
    /// Create a new SQLite step repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProcessStepRepository for SqliteProcessStepRepository {
    async fn load_steps(&self, process_id: &ProcessId) -> Result<Vec<ProcessStep>, CoreError> {
        let query = format!(
            "SELECT {} FROM process_steps WHERE process_id = ?1 ORDER BY seq",
            STEP_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(&process_id.0)
            .fetch_all(self.conn.pool())
            .await
            .map_err(|e| store_error("load process steps", e))?;

        rows.iter().map(step_from_row).collect()
    }

    async fn create_steps(
        &self,
        process_id: &ProcessId,
        step_types: &[ProcessStepTypeId],
    ) -> Result<Vec<ProcessStep>, CoreError> {
        let mut tx = self
            .conn
            .pool()
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| store_error("begin transaction", e))?;

        let exists = sqlx::query("SELECT 1 FROM processes WHERE id = ?1")
            .bind(&process_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error("look up process", e))?;
        if exists.is_none() {
            return Err(CoreError::ProcessNotFound(process_id.0.clone()));
        }

        let mut created = Vec::with_capacity(step_types.len());
        for step_type in step_types {
            let step = ProcessStep::new(process_id.clone(), step_type.clone());
            sqlx::query(
                r#"
                INSERT INTO process_steps
                    (id, process_id, process_step_type_id, status, date_created, date_last_changed, message)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&step.id.0)
            .bind(&step.process_id.0)
            .bind(&step.process_step_type_id.0)
            .bind(step.status.as_str())
            .bind(step.date_created)
            .bind(step.date_last_changed)
            .bind(&step.message)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("insert process step", e))?;
            created.push(step);
        }

        tx.commit()
            .await
            .map_err(|e| store_error("commit process steps", e))?;

        debug!(process_id = %process_id, count = created.len(), "Created process steps");
        Ok(created)
    }

    async fn update_step(
        &self,
        step_id: &ProcessStepId,
        modify: StepModifier<'_>,
    ) -> Result<ProcessStep, CoreError> {
        let mut tx = self
            .conn
            .pool()
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| store_error("begin transaction", e))?;

        let query = format!("SELECT {} FROM process_steps WHERE id = ?1", STEP_COLUMNS);
        let row = sqlx::query(&query)
            .bind(&step_id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error("load process step", e))?
            .ok_or_else(|| CoreError::ProcessStepNotFound(step_id.0.clone()))?;

        let mut step = step_from_row(&row)?;
        // Dropping the transaction on error rolls it back
        modify(&mut step)?;

        sqlx::query(
            r#"
            UPDATE process_steps
            SET process_step_type_id = ?1, status = ?2, date_last_changed = ?3, message = ?4
            WHERE id = ?5
            "#,
        )
        .bind(&step.process_step_type_id.0)
        .bind(step.status.as_str())
        .bind(step.date_last_changed)
        .bind(&step.message)
        .bind(&step.id.0)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("update process step", e))?;

        tx.commit()
            .await
            .map_err(|e| store_error("commit process step", e))?;
        Ok(step)
    }
}

/// SQLite implementation of the ProcessRepository
#[derive(Debug, Clone)]
pub struct SqliteProcessRepository {
    conn: SqliteConnection,
}

impl SqliteProcessRepository {
    /// Create a new SQLite process repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProcessRepository for SqliteProcessRepository {
    async fn create_process(&self, process_type_id: &ProcessTypeId) -> Result<Process, CoreError> {
        let process = Process::new(process_type_id.clone());
        sqlx::query(
            "INSERT INTO processes (id, process_type_id, lock_expiry_date, version) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&process.id.0)
        .bind(&process.process_type_id.0)
        .bind(process.lock_expiry_date)
        .bind(&process.version)
        .execute(self.conn.pool())
        .await
        .map_err(|e| store_error("insert process", e))?;

        debug!(process_id = %process.id, process_type = %process_type_id, "Created process");
        Ok(process)
    }

    async fn find_process(&self, process_id: &ProcessId) -> Result<Option<Process>, CoreError> {
        let query = format!("SELECT {} FROM processes WHERE id = ?1", PROCESS_COLUMNS);
        let row = sqlx::query(&query)
            .bind(&process_id.0)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(|e| store_error("load process", e))?;

        row.as_ref().map(process_from_row).transpose()
    }

    async fn list_processes_with_pending_steps(
        &self,
        process_type_ids: &[ProcessTypeId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Process>, CoreError> {
        if process_type_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT p.id, p.process_type_id, p.lock_expiry_date, p.version, MIN(s.seq) AS oldest_pending \
             FROM processes p \
             JOIN process_steps s ON s.process_id = p.id \
             WHERE s.status = ",
        );
        query.push_bind(ProcessStepStatus::Todo.as_str());
        query.push(" AND p.process_type_id IN (");
        let mut kinds = query.separated(", ");
        for process_type_id in process_type_ids {
            kinds.push_bind(process_type_id.0.clone());
        }
        kinds.push_unseparated(")");
        query.push(
            " GROUP BY p.id, p.process_type_id, p.lock_expiry_date, p.version \
             ORDER BY oldest_pending",
        );

        let rows = query
            .build()
            .fetch_all(self.conn.pool())
            .await
            .map_err(|e| store_error("list processes with pending steps", e))?;

        // Lock expiry is compared in Rust; timestamps are stored as text
        let mut processes = Vec::new();
        for row in &rows {
            let process = process_from_row(row)?;
            if !process.is_locked(now) {
                processes.push(process);
            }
        }
        Ok(processes)
    }

    async fn update_lock(
        &self,
        process_id: &ProcessId,
        expected_version: &str,
        lock_expiry_date: Option<DateTime<Utc>>,
    ) -> Result<Option<Process>, CoreError> {
        let mut process = self
            .find_process(process_id)
            .await?
            .ok_or_else(|| CoreError::ProcessNotFound(process_id.0.clone()))?;
        if process.version != expected_version {
            debug!(process_id = %process_id, "Process version changed, lock not updated");
            return Ok(None);
        }

        process.set_lock(lock_expiry_date);
        let result = sqlx::query(
            "UPDATE processes SET lock_expiry_date = ?1, version = ?2 WHERE id = ?3 AND version = ?4",
        )
        .bind(process.lock_expiry_date)
        .bind(&process.version)
        .bind(&process_id.0)
        .bind(expected_version)
        .execute(self.conn.pool())
        .await
        .map_err(|e| store_error("update process lock", e))?;

        if result.rows_affected() == 0 {
            debug!(process_id = %process_id, "Lost lock race on process");
            return Ok(None);
        }
        Ok(Some(process))
    }
}
