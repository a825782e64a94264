use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Value object: Process ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

/// Value object: Process step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessStepId(pub String);

/// Value object: Process type ID (the workflow kind)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessTypeId(pub String);

/// Value object: Process step type ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessStepTypeId(pub String);

impl ProcessId {
    /// Generate a fresh random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ProcessStepId {
    /// Generate a fresh random ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ProcessTypeId {
    /// Create from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl ProcessStepTypeId {
    /// Create from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

macro_rules! display_newtype {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_newtype!(ProcessId, ProcessStepId, ProcessTypeId, ProcessStepTypeId);

/// Status of a process step
///
/// `Todo` is the only non-terminal status. Once a step leaves it, the
/// status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStepStatus {
    /// Awaiting execution
    Todo,

    /// Completed successfully
    Done,

    /// Ended by a business failure
    Failed,

    /// Superseded by the outcome of another step
    Skipped,

    /// Second or later row of a step type executed in the same run
    Duplicate,
}

impl ProcessStepStatus {
    /// Persisted name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStepStatus::Todo => "TODO",
            ProcessStepStatus::Done => "DONE",
            ProcessStepStatus::Failed => "FAILED",
            ProcessStepStatus::Skipped => "SKIPPED",
            ProcessStepStatus::Duplicate => "DUPLICATE",
        }
    }

    /// Whether the status is final
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStepStatus::Todo)
    }
}

impl fmt::Display for ProcessStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStepStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TODO" => Ok(ProcessStepStatus::Todo),
            "DONE" => Ok(ProcessStepStatus::Done),
            "FAILED" => Ok(ProcessStepStatus::Failed),
            "SKIPPED" => Ok(ProcessStepStatus::Skipped),
            "DUPLICATE" => Ok(ProcessStepStatus::Duplicate),
            other => Err(CoreError::SerializationError(format!(
                "Unknown process step status: {}",
                other
            ))),
        }
    }
}

/// Entity: one unit of work within a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    /// Unique identifier
    pub id: ProcessStepId,

    /// Step type, interpreted by the workflow definition
    pub process_step_type_id: ProcessStepTypeId,

    /// Current status
    pub status: ProcessStepStatus,

    /// Owning process
    pub process_id: ProcessId,

    /// Creation timestamp
    pub date_created: DateTime<Utc>,

    /// Timestamp of the last status or message change
    pub date_last_changed: Option<DateTime<Utc>>,

    /// Diagnostic detail recorded with the last change
    pub message: Option<String>,
}

impl ProcessStep {
    /// Create a new pending step
    pub fn new(process_id: ProcessId, process_step_type_id: ProcessStepTypeId) -> Self {
        Self {
            id: ProcessStepId::generate(),
            process_step_type_id,
            status: ProcessStepStatus::Todo,
            process_id,
            date_created: Utc::now(),
            date_last_changed: None,
            message: None,
        }
    }

    /// Whether the step still awaits execution
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == ProcessStepStatus::Todo
    }

    /// Change the status and message of the step
    ///
    /// A terminal step rejects every change. A pending step may stay
    /// `Todo`, which only records the message.
    pub fn set_status(
        &mut self,
        status: ProcessStepStatus,
        message: Option<String>,
    ) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidStatusTransition {
                step_id: self.id.0.clone(),
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        self.status = status;
        self.message = message;
        self.date_last_changed = Some(Utc::now());
        Ok(())
    }
}

/// Aggregate root: one instance of a long-running workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Unique identifier
    pub id: ProcessId,

    /// Workflow kind
    pub process_type_id: ProcessTypeId,

    /// Lock held by a worker until this instant
    pub lock_expiry_date: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, rotated on every lock change
    pub version: String,
}

impl Process {
    /// Create a new unlocked process
    pub fn new(process_type_id: ProcessTypeId) -> Self {
        Self {
            id: ProcessId::generate(),
            process_type_id,
            lock_expiry_date: None,
            version: Uuid::new_v4().to_string(),
        }
    }

    /// Whether an unexpired lock is held at `now`
    #[inline]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lock_expiry_date, Some(expiry) if expiry > now)
    }

    /// Set or clear the lock and rotate the version
    pub fn set_lock(&mut self, lock_expiry_date: Option<DateTime<Utc>>) {
        self.lock_expiry_date = lock_expiry_date;
        self.version = Uuid::new_v4().to_string();
    }
}
