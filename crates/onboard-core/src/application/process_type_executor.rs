//! Contract between the engine and one workflow kind.
//!
//! A workflow definition is stateless with respect to a single process.
//! Everything it needs travels through the arguments and everything it
//! decides travels back through the returned result; the engine owns all
//! persistence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancellation::CancellationToken;
use crate::domain::process::{ProcessId, ProcessStepStatus, ProcessStepTypeId, ProcessTypeId};
use crate::error::StepError;

/// Outcome of bootstrapping a process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationResult {
    /// Whether initialization changed anything
    pub modified: bool,

    /// Step types to create before the run starts
    pub schedule_step_types: Option<Vec<ProcessStepTypeId>>,
}

impl InitializationResult {
    /// Nothing to do, the process is already initialized
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Bootstrap the given step types
    pub fn bootstrap(step_types: Vec<ProcessStepTypeId>) -> Self {
        Self {
            modified: true,
            schedule_step_types: Some(step_types),
        }
    }
}

/// Status a step execution asks the engine to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResultStatus {
    /// Finished successfully
    Done,
    /// Still pending
    Todo,
    /// Finished with a business failure
    Failed,
}

impl From<StepResultStatus> for ProcessStepStatus {
    fn from(status: StepResultStatus) -> Self {
        match status {
            StepResultStatus::Done => ProcessStepStatus::Done,
            StepResultStatus::Todo => ProcessStepStatus::Todo,
            StepResultStatus::Failed => ProcessStepStatus::Failed,
        }
    }
}

/// Outcome of executing one step type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecutionResult {
    /// Whether the execution changed anything worth persisting
    pub modified: bool,

    /// Status for the executed step
    pub status: StepResultStatus,

    /// Message stored on the executed step
    pub message: Option<String>,

    /// Step types to create
    pub schedule_step_types: Option<Vec<ProcessStepTypeId>>,

    /// Pending step types to skip
    pub skip_step_types: Option<Vec<ProcessStepTypeId>>,
}

impl StepExecutionResult {
    /// Step finished successfully
    pub fn done() -> Self {
        Self {
            modified: true,
            status: StepResultStatus::Done,
            message: None,
            schedule_step_types: None,
            skip_step_types: None,
        }
    }

    /// External dependency has not answered yet; leave the step untouched
    pub fn not_ready() -> Self {
        Self {
            modified: false,
            status: StepResultStatus::Todo,
            message: None,
            schedule_step_types: None,
            skip_step_types: None,
        }
    }

    /// Keep the step pending but record why
    pub fn pending_with_message(message: impl Into<String>) -> Self {
        Self {
            modified: true,
            status: StepResultStatus::Todo,
            message: Some(message.into()),
            schedule_step_types: None,
            skip_step_types: None,
        }
    }

    /// Step finished with a business failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            modified: true,
            status: StepResultStatus::Failed,
            message: Some(message.into()),
            schedule_step_types: None,
            skip_step_types: None,
        }
    }

    /// Request the given step types to be created
    pub fn schedule(mut self, step_types: impl IntoIterator<Item = ProcessStepTypeId>) -> Self {
        self.schedule_step_types
            .get_or_insert_with(Vec::new)
            .extend(step_types);
        self
    }

    /// Request pending steps of the given types to be skipped
    pub fn skip(mut self, step_types: impl IntoIterator<Item = ProcessStepTypeId>) -> Self {
        self.skip_step_types
            .get_or_insert_with(Vec::new)
            .extend(step_types);
        self
    }

    /// Whether the executed step has to be written at all
    pub(crate) fn requires_write(&self) -> bool {
        self.modified || self.status != StepResultStatus::Todo || self.message.is_some()
    }
}

/// One workflow kind, pluggable into the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessTypeExecutor: Send + Sync {
    /// Workflow kind used for registry lookup
    fn process_type_id(&self) -> ProcessTypeId;

    /// Every step type this definition executes automatically
    fn executable_step_types(&self) -> Vec<ProcessStepTypeId>;

    /// Whether the engine should run steps of this type; manual and
    /// foreign step types return false
    fn is_executable_step_type(&self, step_type: &ProcessStepTypeId) -> bool {
        self.executable_step_types().contains(step_type)
    }

    /// Whether running this step type needs the process lock
    fn is_lock_requested(&self, step_type: &ProcessStepTypeId) -> bool;

    /// Called once per run before any step executes
    async fn initialize_process(
        &self,
        process_id: &ProcessId,
        existing_step_types: &[ProcessStepTypeId],
    ) -> Result<InitializationResult, StepError>;

    /// Execute one step type on behalf of every pending row of that type
    async fn execute_process_step(
        &self,
        step_type: &ProcessStepTypeId,
        other_step_types: &[ProcessStepTypeId],
        cancellation: &CancellationToken,
    ) -> Result<StepExecutionResult, StepError>;
}
