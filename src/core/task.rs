//! Task and result types
//!
//! A `Task` is produced by a submitter and consumed exactly once by one worker.
//! Its outcome travels back to the caller as a `TaskResult`.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Task identifier chosen by the submitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    #[inline(always)]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Unit of work: an id plus an opaque payload
///
/// Immutable after creation. The payload is `Bytes`, so moving a task
/// between threads never copies the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    payload: Bytes,
}

impl Task {
    /// Create a task from anything convertible into `Bytes`
    pub fn new(id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            id: TaskId(id),
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Why a task produced no output
///
/// Recovered inside the worker and surfaced only through `TaskResult`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task discarded during shutdown")]
    Discarded,
}

impl TaskError {
    /// Convenience constructor for handler errors
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskError::Failed(reason.into())
    }
}

/// Outcome of one task, owned by whoever drains the results channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub outcome: Result<Bytes, TaskError>,
    /// True when the output was served from the cache without running the handler
    pub cached: bool,
}

impl TaskResult {
    pub fn success(task_id: TaskId, output: Bytes, cached: bool) -> Self {
        Self {
            task_id,
            outcome: Ok(output),
            cached,
        }
    }

    pub fn failure(task_id: TaskId, error: TaskError) -> Self {
        Self {
            task_id,
            outcome: Err(error),
            cached: false,
        }
    }

    pub fn discarded(task_id: TaskId) -> Self {
        Self::failure(task_id, TaskError::Discarded)
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    #[inline]
    pub fn is_discarded(&self) -> bool {
        matches!(self.outcome, Err(TaskError::Discarded))
    }

    pub fn output(&self) -> Option<&Bytes> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.outcome.as_ref().err()
    }
}
