//! TaskStore port - タスクの正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - 状態（TaskStatus）と metadata
//! - 挿入順（ids / get_next の順序）
//! - 出力ログ（append-only, byte offset で読み出し）

use crate::domain::{Metadata, TaskError, TaskId, TaskRecord, TaskStatus, TaskType};

/// TaskStore は状態・出力の正本
///
/// # 設計原則
/// - Every read-modify-write is atomic across processes.
/// - Output is append-only and can be read from any byte offset without
///   loading the record.
/// - Implementations must be safe to share between the API side and a
///   runner in another process.
pub trait TaskStore: Send + Sync {
    /// Persist a new PENDING record and return its id.
    ///
    /// Fails with `UnknownTaskType` when `task_type` is not registered.
    fn enqueue(&self, task_type: &TaskType, metadata: Metadata) -> Result<TaskId, TaskError>;

    fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, TaskError>;

    /// Oldest record still PENDING, in insertion order.
    fn get_next(&self) -> Result<Option<TaskRecord>, TaskError>;

    /// Delete a record and its output. Refuses RUNNING records.
    fn remove(&self, id: &TaskId) -> Result<(), TaskError>;

    /// All ids in insertion order, regardless of status.
    fn ids(&self) -> Result<Vec<TaskId>, TaskError>;

    /// Move a record to `status`, validating the transition.
    fn update_status(&self, id: &TaskId, status: TaskStatus) -> Result<TaskRecord, TaskError>;

    fn append_output(&self, id: &TaskId, bytes: &[u8]) -> Result<(), TaskError>;

    /// `output[offset..]`; empty when `offset` is at or past the end.
    ///
    /// `offset` counts bytes. One that lands inside a multi-byte character
    /// moves forward to the next character boundary.
    fn read_output(&self, id: &TaskId, offset: u64) -> Result<String, TaskError>;

    fn output_len(&self, id: &TaskId) -> Result<u64, TaskError>;
}
