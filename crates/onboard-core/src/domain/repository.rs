//! Repository traits for the process engine
//!
//! The engine only depends on these traits. Persistence crates implement
//! them for a concrete store; every call must be atomic on its own, the
//! engine never spans a transaction over several calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::process::{Process, ProcessId, ProcessStep, ProcessStepId, ProcessStepTypeId, ProcessTypeId};
use crate::CoreError;

/// Mutation applied to a loaded step by [`ProcessStepRepository::update_step`]
pub type StepModifier<'a> = &'a (dyn Fn(&mut ProcessStep) -> Result<(), CoreError> + Send + Sync);

/// Repository for process steps (the Step Store)
#[async_trait]
pub trait ProcessStepRepository: Send + Sync {
    /// Load all steps of a process in creation order
    async fn load_steps(&self, process_id: &ProcessId) -> Result<Vec<ProcessStep>, CoreError>;

    /// Create one pending step per entry, returned in input order
    async fn create_steps(
        &self,
        process_id: &ProcessId,
        step_types: &[ProcessStepTypeId],
    ) -> Result<Vec<ProcessStep>, CoreError>;

    /// Load a step, apply `modify` and persist the result atomically
    async fn update_step(
        &self,
        step_id: &ProcessStepId,
        modify: StepModifier<'_>,
    ) -> Result<ProcessStep, CoreError>;
}

/// Repository for processes (the Process Store)
#[async_trait]
pub trait ProcessRepository: Send + Sync {
    /// Create a new unlocked process of the given kind
    async fn create_process(&self, process_type_id: &ProcessTypeId) -> Result<Process, CoreError>;

    /// Find a process by ID
    async fn find_process(&self, process_id: &ProcessId) -> Result<Option<Process>, CoreError>;

    /// Processes of the given kinds with at least one pending step and no
    /// lock held at `now`, oldest pending step first
    async fn list_processes_with_pending_steps(
        &self,
        process_type_ids: &[ProcessTypeId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Process>, CoreError>;

    /// Set or clear the process lock if `expected_version` still matches.
    ///
    /// Returns `None` when another writer changed the process first.
    async fn update_lock(
        &self,
        process_id: &ProcessId,
        expected_version: &str,
        lock_expiry_date: Option<DateTime<Utc>>,
    ) -> Result<Option<Process>, CoreError>;
}
