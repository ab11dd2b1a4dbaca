//! Task lifecycle: records, persistence, and state transitions.

pub mod manager;
pub mod model;
pub mod store;

use thiserror::Error;

pub use manager::TaskManager;
pub use model::{Task, TaskStatus};
pub use store::{SqliteTaskStore, TaskStore};

/// Errors raised by task bookkeeping.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No task with this identifier exists.
    #[error("task {0} not found")]
    NotFound(i64),
    /// The task is not in a state that allows the requested transition.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task identifier.
        task_id: i64,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },
    /// Database access failed.
    #[error("task database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for TaskError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Database(error.to_string())
    }
}
