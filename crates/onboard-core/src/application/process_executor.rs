//! Process execution engine
//!
//! One call to [`ProcessExecutor::execute_process`] walks the pending steps
//! of a single process: it bootstraps the process through its workflow
//! definition, executes every distinct executable step type exactly once,
//! collapses further rows of the same type as duplicates and applies the
//! skip and schedule requests each execution returns.
//!
//! The run is a lazy stream. Nothing touches the store until the stream is
//! polled, and every item reports one persisted write (`true`) or one
//! observation that wrote nothing (`false`). Progress is committed row by
//! row, so a run that ends early can simply be invoked again.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, error, info, warn, Instrument};

use super::process_type_executor::{ProcessTypeExecutor, StepExecutionResult};
use super::registry::ProcessTypeRegistry;
use crate::cancellation::CancellationToken;
use crate::domain::process::{
    ProcessId, ProcessStep, ProcessStepStatus, ProcessStepTypeId, ProcessTypeId,
};
use crate::domain::repository::ProcessStepRepository;
use crate::error::{CoreError, StepError};

/// Outcomes of one engine run, in write order
pub type ProcessExecutionStream = BoxStream<'static, Result<bool, CoreError>>;

/// Drives processes through their registered workflow definitions
#[derive(Clone)]
pub struct ProcessExecutor {
    registry: Arc<ProcessTypeRegistry>,
    step_repository: Arc<dyn ProcessStepRepository>,
}

impl ProcessExecutor {
    /// Create a new engine over a registry and a step store
    pub fn new(
        registry: Arc<ProcessTypeRegistry>,
        step_repository: Arc<dyn ProcessStepRepository>,
    ) -> Self {
        Self {
            registry,
            step_repository,
        }
    }

    /// Workflow kinds this engine can execute
    pub fn registered_process_types(&self) -> Vec<ProcessTypeId> {
        self.registry.registered_process_types()
    }

    /// Step types the definition of `process_type_id` executes automatically
    pub fn executable_step_types(
        &self,
        process_type_id: &ProcessTypeId,
    ) -> Result<Vec<ProcessStepTypeId>, CoreError> {
        Ok(self.definition(process_type_id)?.executable_step_types())
    }

    /// Whether `step_type` is executed automatically for `process_type_id`
    pub fn is_executable_step_type(
        &self,
        process_type_id: &ProcessTypeId,
        step_type: &ProcessStepTypeId,
    ) -> Result<bool, CoreError> {
        Ok(self.definition(process_type_id)?.is_executable_step_type(step_type))
    }

    /// Whether running `step_type` requires the caller to lock the process
    pub fn is_lock_requested(
        &self,
        process_type_id: &ProcessTypeId,
        step_type: &ProcessStepTypeId,
    ) -> Result<bool, CoreError> {
        Ok(self.definition(process_type_id)?.is_lock_requested(step_type))
    }

    /// Start a run for one process.
    ///
    /// Fails right away when no definition is registered for the kind.
    /// Everything else, including store access, happens while the returned
    /// stream is polled. A failing step store, a fatal step error or a
    /// cancellation ends the stream with a final `Err` item.
    pub fn execute_process(
        &self,
        process_id: &ProcessId,
        process_type_id: &ProcessTypeId,
        cancellation: CancellationToken,
    ) -> Result<ProcessExecutionStream, CoreError> {
        let executor = self.definition(process_type_id)?;

        let span = tracing::info_span!(
            "process_run",
            process_id = %process_id,
            process_type = %process_type_id
        );

        let run = ProcessRun {
            process_id: process_id.clone(),
            executor,
            step_repository: self.step_repository.clone(),
            cancellation,
            phase: RunPhase::Initialize,
            pending: Vec::new(),
            queue: VecDeque::new(),
            processed: HashSet::new(),
            outcomes: VecDeque::new(),
            failure: None,
        };

        let stream = stream::unfold(run, move |mut run| {
            let span = span.clone();
            async move {
                let item = run.next_outcome().await?;
                Some((item, run))
            }
            .instrument(span)
        });

        Ok(stream.boxed())
    }

    fn definition(
        &self,
        process_type_id: &ProcessTypeId,
    ) -> Result<Arc<dyn ProcessTypeExecutor>, CoreError> {
        self.registry
            .get(process_type_id)
            .ok_or_else(|| CoreError::ProcessTypeNotRegistered(process_type_id.0.clone()))
    }
}

impl std::fmt::Debug for ProcessExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessExecutor")
            .field("registry", &self.registry)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Initialize,
    Execute,
    Finished,
}

/// State of one run, owned by the stream
struct ProcessRun {
    process_id: ProcessId,
    executor: Arc<dyn ProcessTypeExecutor>,
    step_repository: Arc<dyn ProcessStepRepository>,
    cancellation: CancellationToken,
    phase: RunPhase,
    /// Pending rows of the process in load order, foreign types included
    pending: Vec<ProcessStep>,
    /// Executable step types still to run, in first-seen order
    queue: VecDeque<ProcessStepTypeId>,
    processed: HashSet<ProcessStepTypeId>,
    outcomes: VecDeque<bool>,
    failure: Option<CoreError>,
}

impl ProcessRun {
    async fn next_outcome(&mut self) -> Option<Result<bool, CoreError>> {
        loop {
            if let Some(outcome) = self.outcomes.pop_front() {
                return Some(Ok(outcome));
            }
            if let Some(err) = self.failure.take() {
                return Some(Err(err));
            }

            let advanced = match self.phase {
                RunPhase::Initialize => self.initialize().await,
                RunPhase::Execute => self.execute_next().await,
                RunPhase::Finished => return None,
            };

            if let Err(err) = advanced {
                self.phase = RunPhase::Finished;
                self.failure = Some(err);
            }
        }
    }

    async fn initialize(&mut self) -> Result<(), CoreError> {
        // The run never loops back to initialization, whatever happens below
        self.phase = RunPhase::Finished;

        let steps = self.step_repository.load_steps(&self.process_id).await?;
        self.pending = steps.into_iter().filter(ProcessStep::is_pending).collect();

        let existing_step_types = distinct_step_types(self.pending.iter());
        let initialization = self
            .executor
            .initialize_process(&self.process_id, &existing_step_types)
            .await
            .map_err(|err| {
                error!(error = %err, "Process initialization failed");
                CoreError::StepExecutionError(err.to_string())
            })?;

        self.outcomes.push_back(initialization.modified);

        if let Some(step_types) = initialization
            .schedule_step_types
            .filter(|step_types| !step_types.is_empty())
        {
            info!(step_types = ?step_types, "Bootstrapping process steps");
            let created = self
                .step_repository
                .create_steps(&self.process_id, &step_types)
                .await?;
            self.pending.extend(created);
        }

        let executor = &self.executor;
        self.queue = distinct_step_types(
            self.pending
                .iter()
                .filter(|step| executor.is_executable_step_type(&step.process_step_type_id)),
        )
        .into();

        if self.queue.is_empty() {
            debug!("No executable steps pending");
        } else {
            debug!(step_types = self.queue.len(), "Process initialized");
            self.phase = RunPhase::Execute;
        }
        Ok(())
    }

    async fn execute_next(&mut self) -> Result<(), CoreError> {
        if self.queue.is_empty() {
            debug!(executed = self.processed.len(), "Process run finished");
            self.phase = RunPhase::Finished;
            return Ok(());
        }
        if self.cancellation.is_cancelled() {
            info!(remaining = self.queue.len(), "Process run cancelled");
            return Err(CoreError::Cancelled);
        }

        let Some(step_type) = self.queue.pop_front() else {
            return Ok(());
        };
        if !self.processed.insert(step_type.clone()) {
            return Ok(());
        }

        let group: Vec<ProcessStep> = self
            .pending
            .iter()
            .filter(|step| step.process_step_type_id == step_type)
            .cloned()
            .collect();
        let Some((first, duplicates)) = group.split_first() else {
            debug!(step_type = %step_type, "No pending rows left, step type skipped");
            return Ok(());
        };

        let other_step_types = distinct_step_types(
            self.pending
                .iter()
                .filter(|step| step.process_step_type_id != step_type),
        );

        debug!(step_type = %step_type, rows = group.len(), "Executing step type");
        let result = match self
            .executor
            .execute_process_step(&step_type, &other_step_types, &self.cancellation)
            .await
        {
            Ok(result) => result,
            Err(StepError::BusinessFailure { message }) => {
                warn!(step_type = %step_type, %message, "Step failed");
                StepExecutionResult::failed(message)
            }
            Err(StepError::Retryable { message }) => {
                info!(step_type = %step_type, %message, "Step will be retried");
                StepExecutionResult::pending_with_message(message)
            }
            Err(StepError::Fatal(message)) => {
                error!(step_type = %step_type, %message, "Step execution aborted the run");
                return Err(CoreError::StepExecutionError(message));
            }
        };

        self.apply_result(first, duplicates, result).await
    }

    async fn apply_result(
        &mut self,
        first: &ProcessStep,
        duplicates: &[ProcessStep],
        result: StepExecutionResult,
    ) -> Result<(), CoreError> {
        let step_type = first.process_step_type_id.clone();
        let status: ProcessStepStatus = result.status.into();

        let mut retained = None;
        if result.requires_write() {
            let message = result.message.clone();
            let modify = move |step: &mut ProcessStep| step.set_status(status, message.clone());
            let updated = self.step_repository.update_step(&first.id, &modify).await?;
            self.outcomes.push_back(true);
            if updated.is_pending() {
                retained = Some(updated);
            }
        } else {
            debug!(step_type = %step_type, "Step not ready");
            self.outcomes.push_back(false);
            retained = Some(first.clone());
        }

        for duplicate in duplicates {
            self.step_repository
                .update_step(&duplicate.id, &|step: &mut ProcessStep| {
                    step.set_status(ProcessStepStatus::Duplicate, None)
                })
                .await?;
            self.outcomes.push_back(true);
        }
        if !duplicates.is_empty() {
            debug!(step_type = %step_type, count = duplicates.len(), "Marked duplicate steps");
        }

        let first_id = first.id.clone();
        self.pending = std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|step| {
                if step.process_step_type_id != step_type {
                    Some(step)
                } else if step.id == first_id {
                    retained.take()
                } else {
                    None
                }
            })
            .collect();

        if let Some(skip_step_types) = result.skip_step_types {
            self.skip_pending(&step_type, &skip_step_types).await?;
        }
        if let Some(schedule_step_types) = result.schedule_step_types {
            self.schedule(&schedule_step_types).await?;
        }
        Ok(())
    }

    async fn skip_pending(
        &mut self,
        executed: &ProcessStepTypeId,
        skip_step_types: &[ProcessStepTypeId],
    ) -> Result<(), CoreError> {
        let targets: Vec<ProcessStep> = self
            .pending
            .iter()
            .filter(|step| {
                step.process_step_type_id != *executed
                    && skip_step_types.contains(&step.process_step_type_id)
            })
            .cloned()
            .collect();

        for target in targets {
            self.step_repository
                .update_step(&target.id, &|step: &mut ProcessStep| {
                    step.set_status(ProcessStepStatus::Skipped, None)
                })
                .await?;
            self.outcomes.push_back(true);
            self.pending.retain(|step| step.id != target.id);
            debug!(step_type = %target.process_step_type_id, step_id = %target.id, "Skipped step");
        }
        Ok(())
    }

    async fn schedule(&mut self, step_types: &[ProcessStepTypeId]) -> Result<(), CoreError> {
        if step_types.is_empty() {
            return Ok(());
        }

        let created = self
            .step_repository
            .create_steps(&self.process_id, step_types)
            .await?;
        info!(step_types = ?step_types, "Scheduled process steps");

        for step in created {
            let step_type = &step.process_step_type_id;
            if self.executor.is_executable_step_type(step_type)
                && !self.processed.contains(step_type)
                && !self.queue.contains(step_type)
            {
                self.queue.push_back(step_type.clone());
            }
            self.pending.push(step);
        }
        Ok(())
    }
}

/// Distinct step types in first-seen order
fn distinct_step_types<'a>(steps: impl Iterator<Item = &'a ProcessStep>) -> Vec<ProcessStepTypeId> {
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();
    for step in steps {
        if seen.insert(&step.process_step_type_id) {
            distinct.push(step.process_step_type_id.clone());
        }
    }
    distinct
}
