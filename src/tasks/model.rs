//! Task record and lifecycle status.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Lifecycle state of an ingestion task.
///
/// Transitions run only from `Processing` to one of the terminal states. A re-upload of the
/// same file resets the record back to `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted and not yet finished.
    Processing,
    /// Indexed successfully.
    Completed,
    /// Failed; `error_message` explains why.
    Failed,
}

impl TaskStatus {
    /// Column value stored in SQLite.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Durable record of one upload and its processing outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Monotonically assigned identifier, stable across re-uploads.
    pub task_id: i64,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Original file name as uploaded.
    pub file_name: String,
    /// Storage key; doubles as the vector-store document identifier.
    pub file_path: String,
    /// Uploader; unique together with `file_path`.
    pub user_email: String,
    /// Failure description when `status` is `Failed`.
    pub error_message: Option<String>,
    /// JSON diagnostics recorded on completion.
    pub additional_info: Option<String>,
    /// First time this file was uploaded by this user.
    pub created_at: OffsetDateTime,
    /// Last creation, reset, start or terminal transition.
    pub updated_at: OffsetDateTime,
    /// When the task reached a terminal state.
    pub completed_at: Option<OffsetDateTime>,
    /// When a worker began executing the current attempt; `None` while still queued.
    pub started_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_column_text() {
        for status in [
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert!("queued".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn only_processing_is_non_terminal() {
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
