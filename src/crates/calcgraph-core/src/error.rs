//! Error types for graph construction and execution
//!
//! All fallible operations in the engine return [`Result`], and every error
//! condition named by the public contract maps onto one [`Error`] variant:
//!
//! ```text
//! Error
//! ├── MissingTask        - An operation referenced a task that doesn't exist
//! ├── DuplicateTask      - add_task / rename_task hit a name already in use
//! ├── MissingInput       - NamedInputs::getone found zero matching links
//! ├── AmbiguousInput     - NamedInputs::get / getone found more than one link
//! ├── TaskFailed         - A task function reported a failure
//! ├── Expression         - An expression task could not be parsed or evaluated
//! └── ExtentUnsupported  - An extent was passed to a non-streaming graph
//! ```
//!
//! Structural errors (`MissingTask`, `DuplicateTask`) are raised by the
//! mutating operation before anything is touched, so the graph is never left
//! half-mutated. Input-lookup errors surface inside task functions and reach
//! the caller as the failure of the task that performed the lookup. Task
//! failures propagate out of [`Graph::update`](crate::Graph::update) /
//! [`Graph::output`](crate::Graph::output) unchanged, so the caller always
//! sees the root cause even when the failure happened several dependency
//! levels upstream.

use thiserror::Error;

use crate::task::{InputLabel, TaskName};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every error the engine can produce.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation referenced a task name that isn't in the graph.
    #[error("task '{0}' doesn't exist")]
    MissingTask(TaskName),

    /// A task name was already present where a fresh one was required.
    #[error("task '{0}' already exists")]
    DuplicateTask(TaskName),

    /// `getone` found no link carrying the requested input label.
    #[error("no input matches {0}")]
    MissingInput(InputLabel),

    /// `get` / `getone` found more than one link carrying the label.
    #[error("more than one input matches {0}")]
    AmbiguousInput(InputLabel),

    /// A task function reported a failure while executing.
    #[error("task '{task}' failed: {message}")]
    TaskFailed {
        /// Name of the task whose function failed.
        task: TaskName,
        /// Failure description supplied by the task function.
        message: String,
    },

    /// An expression task could not be parsed or evaluated.
    #[error("expression error: {0}")]
    Expression(String),

    /// An extent was supplied to a graph that doesn't implement streaming.
    #[error("extents require a streaming graph")]
    ExtentUnsupported,
}

impl Error {
    /// Shorthand for a [`Error::TaskFailed`] with the given task and message.
    pub fn task_failed(task: impl Into<TaskName>, message: impl Into<String>) -> Self {
        Error::TaskFailed {
            task: task.into(),
            message: message.into(),
        }
    }
}
