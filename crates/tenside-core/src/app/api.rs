//! API views - JSON envelope の形
//!
//! Success: `{"status": "OK", "task": {..}}`, `{"status": "OK", "tasks": [..]}`
//! or `{"status": "OK"}`. Failure: `{"status": "ERROR", "message": ".."}`.
//! Each response carries the HTTP status an HTTP front end should use.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{TaskError, TaskRecord, TaskStatus};

/// Client-facing rendering of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: String,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub task_type: String,
    pub created_at: DateTime<Utc>,
    pub output: String,
}

impl TaskView {
    pub fn new(record: &TaskRecord, output: String) -> Self {
        Self {
            id: record.id.to_string(),
            status: record.status,
            task_type: record.task_type.to_string(),
            created_at: record.created_at,
            output,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    fn ok() -> Self {
        Self {
            status: "OK",
            task: None,
            tasks: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub http_status: u16,
    pub body: Envelope,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            http_status: 200,
            body: Envelope::ok(),
        }
    }

    pub fn task(view: TaskView) -> Self {
        Self {
            http_status: 200,
            body: Envelope {
                task: Some(view),
                ..Envelope::ok()
            },
        }
    }

    /// A freshly queued task (201).
    pub fn created(view: TaskView) -> Self {
        Self {
            http_status: 201,
            ..Self::task(view)
        }
    }

    pub fn tasks(views: Vec<TaskView>) -> Self {
        Self {
            http_status: 200,
            body: Envelope {
                tasks: Some(views),
                ..Envelope::ok()
            },
        }
    }

    pub fn error(err: &TaskError) -> Self {
        Self {
            http_status: err.http_status(),
            body: Envelope {
                status: "ERROR",
                message: Some(err.to_string()),
                ..Envelope::ok()
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.body.status == "OK"
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.body)
            .unwrap_or_else(|_| r#"{"status":"ERROR","message":"unserializable response"}"#.to_string())
    }
}

impl From<Result<ApiResponse, TaskError>> for ApiResponse {
    fn from(result: Result<ApiResponse, TaskError>) -> Self {
        result.unwrap_or_else(|err| ApiResponse::error(&err))
    }
}
