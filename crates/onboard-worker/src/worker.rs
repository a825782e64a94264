//! Driving loop: finds processes with pending steps and runs the engine on
//! each of them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use onboard_core::{
    CancellationToken, CoreError, Process, ProcessExecutor, ProcessRepository,
    ProcessStepRepository, ProcessStepTypeId, ProcessTypeRegistry,
};

use crate::{Stores, WorkerConfig, WorkerResult};

/// Counters of one pass over pending processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerPassSummary {
    /// Processes the engine ran on
    pub processed: usize,
    /// Writes reported by all engine runs of the pass
    pub modified: usize,
    /// Processes skipped because another worker holds their lock
    pub skipped_locked: usize,
    /// Processes skipped because only manual steps are pending
    pub skipped_manual: usize,
    /// Processes whose run ended with an error
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessOutcome {
    Executed { modified: usize },
    SkippedLocked,
    SkippedManual,
    NotStarted,
    Failed,
}

impl WorkerPassSummary {
    fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Executed { modified } => {
                self.processed += 1;
                self.modified += modified;
            }
            ProcessOutcome::SkippedLocked => self.skipped_locked += 1,
            ProcessOutcome::SkippedManual => self.skipped_manual += 1,
            ProcessOutcome::NotStarted => {}
            ProcessOutcome::Failed => self.failed += 1,
        }
    }
}

/// Periodic worker invoking the engine once per pending process
pub struct ProcessWorker {
    executor: ProcessExecutor,
    process_repository: Arc<dyn ProcessRepository>,
    step_repository: Arc<dyn ProcessStepRepository>,
    config: WorkerConfig,
}

impl ProcessWorker {
    /// Create a worker over a registry and the stores
    pub fn new(registry: Arc<ProcessTypeRegistry>, stores: Stores, config: WorkerConfig) -> Self {
        let executor = ProcessExecutor::new(registry, stores.steps.clone());
        Self {
            executor,
            process_repository: stores.processes,
            step_repository: stores.steps,
            config,
        }
    }

    /// The engine this worker drives
    pub fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    /// Run passes every poll interval until `cancellation` fires
    pub async fn run(&self, cancellation: &CancellationToken) -> WorkerResult<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            process_types = ?self.executor.registered_process_types(),
            poll_interval_ms = self.config.poll_interval_ms,
            "Process worker started"
        );

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = interval.tick() => {
                    match self.run_pass(cancellation).await {
                        Ok(summary) if summary.processed > 0 || summary.failed > 0 => {
                            info!(?summary, "Worker pass finished");
                        }
                        Ok(summary) => debug!(?summary, "Worker pass finished"),
                        Err(e) => error!(error = %e, "Worker pass failed"),
                    }
                }
            }
        }

        info!("Process worker stopped");
        Ok(())
    }

    /// Execute every process that currently has pending steps
    pub async fn run_pass(&self, cancellation: &CancellationToken) -> WorkerResult<WorkerPassSummary> {
        let process_types = self.executor.registered_process_types();
        if process_types.is_empty() {
            return Ok(WorkerPassSummary::default());
        }

        let mut processes = self
            .process_repository
            .list_processes_with_pending_steps(&process_types, Utc::now())
            .await?;
        processes.truncate(self.config.max_processes_per_pass);
        debug!(count = processes.len(), "Found processes with pending steps");

        let outcomes: Vec<ProcessOutcome> = stream::iter(processes)
            .map(|process| self.process_one(process, cancellation))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut summary = WorkerPassSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        Ok(summary)
    }

    async fn process_one(&self, process: Process, cancellation: &CancellationToken) -> ProcessOutcome {
        if cancellation.is_cancelled() {
            return ProcessOutcome::NotStarted;
        }

        let span = tracing::info_span!(
            "worker_process",
            process_id = %process.id,
            process_type = %process.process_type_id
        );

        async move {
            match self.execute(&process, cancellation).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Process execution failed");
                    ProcessOutcome::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        process: &Process,
        cancellation: &CancellationToken,
    ) -> WorkerResult<ProcessOutcome> {
        let kind = &process.process_type_id;
        let steps = self.step_repository.load_steps(&process.id).await?;

        let mut seen = HashSet::new();
        let mut executable: Vec<ProcessStepTypeId> = Vec::new();
        for step in steps.iter().filter(|step| step.is_pending()) {
            let step_type = &step.process_step_type_id;
            if seen.insert(step_type) && self.executor.is_executable_step_type(kind, step_type)? {
                executable.push(step_type.clone());
            }
        }
        if executable.is_empty() {
            debug!("Only manual steps pending");
            return Ok(ProcessOutcome::SkippedManual);
        }

        let mut lock_requested = false;
        for step_type in &executable {
            lock_requested |= self.executor.is_lock_requested(kind, step_type)?;
        }

        let lock = if lock_requested {
            let expiry = Utc::now() + self.config.lock_expiry();
            match self
                .process_repository
                .update_lock(&process.id, &process.version, Some(expiry))
                .await?
            {
                Some(locked) => {
                    debug!(lock_expiry = %expiry, "Process locked");
                    Some(locked)
                }
                None => {
                    debug!("Process is being changed by someone else");
                    return Ok(ProcessOutcome::SkippedLocked);
                }
            }
        } else {
            None
        };

        let result = self.consume_run(process, cancellation).await;

        if let Some(locked) = lock {
            match self
                .process_repository
                .update_lock(&locked.id, &locked.version, None)
                .await
            {
                Ok(Some(_)) => debug!("Process unlocked"),
                Ok(None) => warn!("Process lock was taken over before release"),
                Err(e) => warn!(error = %e, "Failed to release process lock"),
            }
        }

        result
    }

    async fn consume_run(
        &self,
        process: &Process,
        cancellation: &CancellationToken,
    ) -> WorkerResult<ProcessOutcome> {
        let mut run = self.executor.execute_process(
            &process.id,
            &process.process_type_id,
            cancellation.clone(),
        )?;

        let mut modified = 0;
        while let Some(outcome) = run.next().await {
            match outcome {
                Ok(true) => modified += 1,
                Ok(false) => {}
                Err(CoreError::Cancelled) => {
                    info!(modified, "Process run interrupted by shutdown");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(modified, "Process run finished");
        Ok(ProcessOutcome::Executed { modified })
    }
}

impl std::fmt::Debug for ProcessWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWorker")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish()
    }
}
