use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{TaskId, TaskStatus};

/// Free-form metadata supplied at enqueue time (the request body).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Persisted description of one queued unit of work.
///
/// The output log is not part of the record: it lives next to it and is
/// read by byte offset through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TaskRecord {
    pub fn new(id: TaskId, task_type: TaskType, metadata: Metadata, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type,
            status: TaskStatus::Pending,
            created_at,
            metadata,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    #[test]
    fn new_record_starts_pending() {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let record = TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("upgrade"),
            Metadata::new(),
            created_at,
        );

        assert_eq!(record.status, TaskStatus::Pending);
        assert!(!record.is_running());
        assert_eq!(record.created_at, created_at);
    }

    #[test]
    fn record_json_uses_type_key() {
        let mut metadata = Metadata::new();
        metadata.insert("type".into(), json!("upgrade"));
        metadata.insert("packages".into(), json!(["vendor/a"]));
        let record = TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("upgrade"),
            metadata,
            Utc::now(),
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!("upgrade"));
        assert_eq!(value["status"], json!("PENDING"));
        assert_eq!(value["metadata"]["packages"], json!(["vendor/a"]));

        let back: TaskRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
