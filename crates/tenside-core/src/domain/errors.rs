//! Errors - エラー型と分類

use std::path::PathBuf;

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

/// ErrorKind は実行エラーの分類
///
/// - User: the request itself is malformed or names something unknown
/// - NotFound: the addressed task (or a pending task) does not exist
/// - Conflict: the request collides with a running task or held lock
/// - Infrastructure: filesystem, process launch or configuration failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    NotFound,
    Conflict,
    Infrastructure,
}

impl ErrorKind {
    /// HTTP-equivalent status code used by the JSON envelope.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::User | ErrorKind::Conflict => 406,
            ErrorKind::NotFound => 404,
            ErrorKind::Infrastructure => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("Task id {0} not found")]
    NotFound(String),

    #[error("Task id {0} is running and can not be deleted")]
    TaskRunning(TaskId),

    #[error("Task already running")]
    AlreadyRunning,

    #[error("No pending task")]
    NoPendingTask,

    #[error("Task id {id} is {status}, only PENDING tasks can be run")]
    NotPending { id: TaskId, status: TaskStatus },

    #[error("Task id {id} can not move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Spawning worker for task {task} failed: {message}")]
    SpawnFailed {
        task: TaskId,
        message: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Command `{command}` failed with exit code {}", display_code(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt data in {}: {source}", .path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string())
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::InvalidPayload(_) | TaskError::UnknownTaskType(_) => ErrorKind::User,
            TaskError::NotFound(_) | TaskError::NoPendingTask => ErrorKind::NotFound,
            TaskError::TaskRunning(_)
            | TaskError::AlreadyRunning
            | TaskError::NotPending { .. }
            | TaskError::InvalidTransition { .. } => ErrorKind::Conflict,
            TaskError::SpawnFailed { .. }
            | TaskError::CommandFailed { .. }
            | TaskError::Storage { .. }
            | TaskError::Codec { .. }
            | TaskError::Config(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn codec(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        TaskError::Codec {
            path: path.into(),
            source,
        }
    }
}
