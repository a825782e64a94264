//! Scripted workflow definitions for tests in this and dependent crates

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::application::process_type_executor::{
    InitializationResult, ProcessTypeExecutor, StepExecutionResult,
};
use crate::cancellation::CancellationToken;
use crate::domain::process::{ProcessId, ProcessStepTypeId, ProcessTypeId};
use crate::error::StepError;

/// One recorded call to `execute_process_step`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStepCall {
    /// Executed step type
    pub step_type: ProcessStepTypeId,
    /// Other pending step types handed to the definition
    pub other_step_types: Vec<ProcessStepTypeId>,
}

/// Scripted answer to one step execution
pub type ScriptedResponse = Result<StepExecutionResult, StepError>;

/// Workflow definition answering from a script and recording every call
///
/// Steps without a scripted answer complete with [`StepExecutionResult::done`].
#[derive(Debug)]
pub struct ScriptedProcessTypeExecutor {
    process_type_id: ProcessTypeId,
    executable_step_types: Vec<ProcessStepTypeId>,
    lock_requested: Vec<ProcessStepTypeId>,
    bootstrap_step_types: Option<Vec<ProcessStepTypeId>>,
    cancel_after: Option<ProcessStepTypeId>,
    responses: Mutex<HashMap<ProcessStepTypeId, VecDeque<ScriptedResponse>>>,
    standing_responses: Mutex<HashMap<ProcessStepTypeId, ScriptedResponse>>,
    calls: Mutex<Vec<RecordedStepCall>>,
    initializations: Mutex<Vec<Vec<ProcessStepTypeId>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_step_types<I, S>(names: I) -> Vec<ProcessStepTypeId>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(ProcessStepTypeId::new).collect()
}

impl ScriptedProcessTypeExecutor {
    /// Create a definition for `process_type_id` that executes nothing
    pub fn new(process_type_id: impl Into<String>) -> Self {
        Self {
            process_type_id: ProcessTypeId::new(process_type_id),
            executable_step_types: Vec::new(),
            lock_requested: Vec::new(),
            bootstrap_step_types: None,
            cancel_after: None,
            responses: Mutex::new(HashMap::new()),
            standing_responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            initializations: Mutex::new(Vec::new()),
        }
    }

    /// Step types executed automatically; anything else counts as manual
    pub fn with_executable_step_types<I, S>(mut self, step_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executable_step_types = to_step_types(step_types);
        self
    }

    /// Step types that request the process lock
    pub fn with_lock_requested<I, S>(mut self, step_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock_requested = to_step_types(step_types);
        self
    }

    /// Step types created when a process has no pending steps yet
    pub fn with_bootstrap<I, S>(mut self, step_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap_step_types = Some(to_step_types(step_types));
        self
    }

    /// Signal cancellation while executing `step_type`
    pub fn with_cancel_after(mut self, step_type: impl Into<String>) -> Self {
        self.cancel_after = Some(ProcessStepTypeId::new(step_type));
        self
    }

    /// Answer the next execution of `step_type` with `response`
    pub fn respond_once(&self, step_type: impl Into<String>, response: ScriptedResponse) -> &Self {
        lock(&self.responses)
            .entry(ProcessStepTypeId::new(step_type))
            .or_default()
            .push_back(response);
        self
    }

    /// Answer every execution of `step_type` with `response` once the
    /// one-shot answers are used up
    pub fn respond_always(&self, step_type: impl Into<String>, response: ScriptedResponse) -> &Self {
        lock(&self.standing_responses).insert(ProcessStepTypeId::new(step_type), response);
        self
    }

    /// Every recorded step execution, in call order
    pub fn calls(&self) -> Vec<RecordedStepCall> {
        lock(&self.calls).clone()
    }

    /// Executed step type names, in call order
    pub fn executed_step_types(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|call| call.step_type.0.clone())
            .collect()
    }

    /// Existing step types handed to each `initialize_process` call
    pub fn initializations(&self) -> Vec<Vec<ProcessStepTypeId>> {
        lock(&self.initializations).clone()
    }
}

#[async_trait]
impl ProcessTypeExecutor for ScriptedProcessTypeExecutor {
    fn process_type_id(&self) -> ProcessTypeId {
        self.process_type_id.clone()
    }

    fn executable_step_types(&self) -> Vec<ProcessStepTypeId> {
        self.executable_step_types.clone()
    }

    fn is_lock_requested(&self, step_type: &ProcessStepTypeId) -> bool {
        self.lock_requested.contains(step_type)
    }

    async fn initialize_process(
        &self,
        _process_id: &ProcessId,
        existing_step_types: &[ProcessStepTypeId],
    ) -> Result<InitializationResult, StepError> {
        lock(&self.initializations).push(existing_step_types.to_vec());

        match &self.bootstrap_step_types {
            Some(step_types) if existing_step_types.is_empty() => {
                Ok(InitializationResult::bootstrap(step_types.clone()))
            }
            _ => Ok(InitializationResult::unchanged()),
        }
    }

    async fn execute_process_step(
        &self,
        step_type: &ProcessStepTypeId,
        other_step_types: &[ProcessStepTypeId],
        cancellation: &CancellationToken,
    ) -> Result<StepExecutionResult, StepError> {
        lock(&self.calls).push(RecordedStepCall {
            step_type: step_type.clone(),
            other_step_types: other_step_types.to_vec(),
        });

        if self.cancel_after.as_ref() == Some(step_type) {
            cancellation.cancel();
        }

        let scripted = lock(&self.responses)
            .get_mut(step_type)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(response) => response,
            None => lock(&self.standing_responses)
                .get(step_type)
                .cloned()
                .unwrap_or_else(|| Ok(StepExecutionResult::done())),
        }
    }
}
