use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use onboard_core::{
    CoreError, Process, ProcessId, ProcessRepository, ProcessStep, ProcessStepId,
    ProcessStepRepository, ProcessStepTypeId, ProcessTypeId, StepModifier,
};

/// Rows shared by the in-memory repositories
#[derive(Debug, Default)]
pub struct InMemoryState {
    processes: HashMap<String, Process>,
    /// Every step in creation order
    steps: Vec<ProcessStep>,
}

/// In-memory implementation of the ProcessStepRepository
#[derive(Debug, Clone)]
pub struct InMemoryProcessStepRepository {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryProcessStepRepository {
    /// Create a new in-memory step repository
    pub fn new(state: Arc<RwLock<InMemoryState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ProcessStepRepository for InMemoryProcessStepRepository {
    async fn load_steps(&self, process_id: &ProcessId) -> Result<Vec<ProcessStep>, CoreError> {
        let state = self.state.read().await;
        Ok(state
            .steps
            .iter()
            .filter(|step| step.process_id == *process_id)
            .cloned()
            .collect())
    }

    async fn create_steps(
        &self,
        process_id: &ProcessId,
        step_types: &[ProcessStepTypeId],
    ) -> Result<Vec<ProcessStep>, CoreError> {
        let mut state = self.state.write().await;
        if !state.processes.contains_key(&process_id.0) {
            return Err(CoreError::ProcessNotFound(process_id.0.clone()));
        }

        let created: Vec<ProcessStep> = step_types
            .iter()
            .map(|step_type| ProcessStep::new(process_id.clone(), step_type.clone()))
            .collect();
        state.steps.extend(created.iter().cloned());

        debug!(process_id = %process_id, count = created.len(), "Created process steps");
        Ok(created)
    }

    async fn update_step(
        &self,
        step_id: &ProcessStepId,
        modify: StepModifier<'_>,
    ) -> Result<ProcessStep, CoreError> {
        let mut state = self.state.write().await;
        let step = state
            .steps
            .iter_mut()
            .find(|step| step.id == *step_id)
            .ok_or_else(|| CoreError::ProcessStepNotFound(step_id.0.clone()))?;

        // Apply to a copy so a rejected change leaves the row untouched
        let mut updated = step.clone();
        modify(&mut updated)?;
        *step = updated.clone();
        Ok(updated)
    }
}

/// In-memory implementation of the ProcessRepository
#[derive(Debug, Clone)]
pub struct InMemoryProcessRepository {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryProcessRepository {
    /// Create a new in-memory process repository
    pub fn new(state: Arc<RwLock<InMemoryState>>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ProcessRepository for InMemoryProcessRepository {
    async fn create_process(&self, process_type_id: &ProcessTypeId) -> Result<Process, CoreError> {
        let process = Process::new(process_type_id.clone());
        let mut state = self.state.write().await;
        state.processes.insert(process.id.0.clone(), process.clone());
        debug!(process_id = %process.id, process_type = %process_type_id, "Created process");
        Ok(process)
    }

    async fn find_process(&self, process_id: &ProcessId) -> Result<Option<Process>, CoreError> {
        let state = self.state.read().await;
        Ok(state.processes.get(&process_id.0).cloned())
    }

    async fn list_processes_with_pending_steps(
        &self,
        process_type_ids: &[ProcessTypeId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Process>, CoreError> {
        let state = self.state.read().await;

        // Steps are kept in creation order, so the first pending step seen
        // for a process is its oldest one
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for step in state.steps.iter().filter(|step| step.is_pending()) {
            if !seen.insert(&step.process_id) {
                continue;
            }

            let Some(process) = state.processes.get(&step.process_id.0) else {
                continue;
            };
            if process_type_ids.contains(&process.process_type_id) && !process.is_locked(now) {
                result.push(process.clone());
            }
        }
        Ok(result)
    }

    async fn update_lock(
        &self,
        process_id: &ProcessId,
        expected_version: &str,
        lock_expiry_date: Option<DateTime<Utc>>,
    ) -> Result<Option<Process>, CoreError> {
        let mut state = self.state.write().await;
        let process = state
            .processes
            .get_mut(&process_id.0)
            .ok_or_else(|| CoreError::ProcessNotFound(process_id.0.clone()))?;

        if process.version != expected_version {
            debug!(process_id = %process_id, "Process version changed, lock not updated");
            return Ok(None);
        }

        process.set_lock(lock_expiry_date);
        Ok(Some(process.clone()))
    }
}
