//! Error types used by tasks and the execution engine.
//!
//! [`TaskError`] is the failure taxonomy carried inside a task's promise:
//! computation failures, the timeout sentinel produced by a lost race,
//! cancellation causes, and programming-error misuse of the task API.
//!
//! [`EngineError`] is what blocking waits surface to callers. A failed task
//! is wrapped so the original error stays reachable as the source/cause.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a single task.
///
/// Failures are shared as `Arc<TaskError>` because one failing task resolves
/// every task composed on top of it with the same cause.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The user-supplied computation failed with this message.
    #[error("{0}")]
    Failed(String),

    /// Sentinel produced by `with_timeout` when the timer branch wins the race.
    #[error("task timed out")]
    Timeout,

    /// The task was cancelled before it started running.
    #[error("task cancelled: {0}")]
    Cancelled(String),

    /// Task API misuse, e.g. `get()` on a task that is not done.
    #[error("illegal task state: {0}")]
    IllegalState(String),
}

impl TaskError {
    /// Converts a caught panic payload into a task failure, extracting the
    /// panic message where one exists.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Arc<Self> {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "task panicked".to_owned());
        Arc::new(TaskError::Failed(message))
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Failed(_) => "task_failed",
            TaskError::Timeout => "task_timeout",
            TaskError::Cancelled(_) => "task_cancelled",
            TaskError::IllegalState(_) => "task_illegal_state",
        }
    }

    /// True for the timeout sentinel, so callers can branch on timeout
    /// versus other failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout)
    }

    /// True if this error records a cancellation cause.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled(_))
    }
}

/// Errors surfaced by the engine's blocking wait primitives.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EngineError {
    /// The awaited task resolved Failed or Cancelled; the original error is
    /// preserved as the cause.
    #[error("task '{name}' failed")]
    Failed {
        /// Name given to the wait call.
        name: String,
        /// The task's own terminal error.
        #[source]
        cause: Arc<TaskError>,
    },

    /// The wait deadline elapsed before the task reached a terminal state.
    /// The task itself is left untouched and may still complete.
    #[error("timed out after {timeout:?} waiting for task '{name}'")]
    WaitDeadline {
        /// Name given to the wait call.
        name: String,
        /// The wait deadline that elapsed.
        timeout: Duration,
    },

    /// The worker pool could not be created.
    #[error("failed to start worker pool")]
    Pool(#[from] std::io::Error),
}

impl EngineError {
    /// The task error that caused this wait to fail, if any.
    pub fn cause(&self) -> Option<&Arc<TaskError>> {
        match self {
            EngineError::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
