//! Error types used by the gorgeous runtime, its stages and collaborators.
//!
//! - [`RuntimeError`] construction and configuration failures, returned synchronously.
//! - [`TaskError`] failures of a supervised run-loop body (drive restarts).
//! - [`StageError`] advisory errors raised by collaborators (`action` / `handle_data`).
//! - [`QueueError`] a send into a queue that has been closed.
//! - [`MetricsError`] a metrics observer failed to record a sample.
//!
//! Every type provides `as_label` for logs/metrics.

use std::borrow::Cow;

use thiserror::Error;

/// # Errors produced while building or registering pipeline components.
///
/// These never reach a running instance; builders and registration calls return
/// them to the caller before anything is spawned.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A component was configured with values it cannot run with.
    #[error("invalid configuration for {component}: {reason}")]
    InvalidConfig {
        /// Component being built (`fetcher`, `worker`, `dispatcher`, ...).
        component: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A stage or task name was empty.
    #[error("{component} name must not be empty")]
    EmptyName {
        /// Component being built.
        component: &'static str,
    },

    /// A task with the same name is already registered.
    #[error("task {name:?} is already registered")]
    DuplicateTask {
        /// Name of the task.
        name: String,
    },

    /// Following `next()` from a chain head revisited a collaborator.
    #[error("worker chain is cyclic: {name:?} appears twice")]
    CyclicChain {
        /// Name of the collaborator seen twice.
        name: String,
    },

    /// The operation is only allowed before `start()`.
    #[error("{component} {name:?} is already started")]
    AlreadyStarted {
        /// Component kind.
        component: &'static str,
        /// Stage name.
        name: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use gorgeous::RuntimeError;
    ///
    /// let err = RuntimeError::DuplicateTask { name: "orders".into() };
    /// assert_eq!(err.as_label(), "runtime_duplicate_task");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InvalidConfig { .. } => "runtime_invalid_config",
            RuntimeError::EmptyName { .. } => "runtime_empty_name",
            RuntimeError::DuplicateTask { .. } => "runtime_duplicate_task",
            RuntimeError::CyclicChain { .. } => "runtime_cyclic_chain",
            RuntimeError::AlreadyStarted { .. } => "runtime_already_started",
        }
    }
}

/// # Errors produced by a supervised run-loop body.
///
/// `Fail` and `Panicked` are restart requests for the slot supervisor;
/// `Canceled` is a graceful exit.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The body hit a fault it cannot recover from in place.
    #[error("run loop failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The body panicked; caught by the supervisor guard.
    #[error("run loop panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The body observed cancellation.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Whether the supervisor should treat this as a restart request.
    pub fn is_restartable(&self) -> bool {
        !matches!(self, TaskError::Canceled)
    }
}

impl From<QueueError> for TaskError {
    fn from(err: QueueError) -> Self {
        TaskError::Fail {
            error: err.to_string(),
        }
    }
}

/// # Advisory error raised by a fetch or work collaborator.
///
/// Routed to the stage's error stream and logged; never stops the stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StageError {
    message: Cow<'static, str>,
}

impl StageError {
    /// Creates a new error with the given message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns a short stable label for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        "stage_error"
    }
}

impl From<&'static str> for StageError {
    fn from(message: &'static str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StageError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// # Error returned by a queue operation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed before the item was handed off.
    #[error("send on closed queue")]
    Closed,
}

impl QueueError {
    /// Returns a short stable label for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Closed => "queue_closed",
        }
    }
}

/// # Error returned by a [`Metrics`](crate::Metrics) observer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("metrics sink failed: {0}")]
pub struct MetricsError(pub String);

impl MetricsError {
    /// Returns a short stable label for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        "metrics_failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_error_becomes_restartable_task_error() {
        let err: TaskError = QueueError::Closed.into();
        assert!(err.is_restartable());
        assert_eq!(err.as_label(), "task_failed");
        assert!(!TaskError::Canceled.is_restartable());
    }

    #[test]
    fn stage_error_displays_message() {
        let err = StageError::new(format!("boom: {}", "forwarded:data"));
        assert_eq!(err.to_string(), "boom: forwarded:data");
        assert_eq!(err.message(), "boom: forwarded:data");
    }
}
