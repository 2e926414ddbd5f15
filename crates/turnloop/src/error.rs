//! Scheduler error types.

/// Error produced by a task action.
///
/// A task that fails returns one of these from its action; the scheduler
/// catches it, forwards it to the error sink, and moves on to the next task.
/// Task errors never escape the driver loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    /// Create a new task error with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// API-misuse errors, reported synchronously to the caller of the
/// offending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// `cancel` was called with a handle issued by a different scheduler instance
    #[error("handle was issued by a different scheduler instance")]
    InvalidHandle,

    /// The driver loop was invoked from inside a running task
    #[error("scheduler driver is already running")]
    ReentrantRun,
}

/// Result of a task action
pub type TaskResult = Result<(), TaskError>;

/// Result of a scheduler API call
pub type SchedulerResult<T> = Result<T, SchedulerError>;
