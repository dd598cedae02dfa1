//! TaskRunner - worker 側で 1 タスクを実行
//!
//! # フロー
//! 1. claim: PENDING -> RUNNING を永続化（PENDING 以外は拒否）
//! 2. execute: Handler 実行（出力は TaskOutput 経由で逐次追記）
//! 3. 完了行 / エラー行を追記して DONE / ERROR を永続化
//!
//! A worker that has to wait for the task-run lock claims first and
//! executes once it holds the lock; `fail` ends a claimed task that never
//! got to run.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::{TaskError, TaskId, TaskRecord, TaskStatus};
use crate::ports::TaskStore;
use crate::typed::{TaskOutput, TypedRegistry};

pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    registry: Arc<TypedRegistry>,
    log_dir: Option<PathBuf>,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<TypedRegistry>) -> Self {
        Self {
            store,
            registry,
            log_dir: None,
        }
    }

    /// Mirror each task's output to `<dir>/<task id>.log`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Claim a PENDING task and execute it to completion.
    ///
    /// `Ok(true)` when it ended DONE, `Ok(false)` when it ended ERROR. `Err`
    /// only when the task could not be started or its final state could not
    /// be written.
    pub async fn run(&self, id: &TaskId) -> Result<bool, TaskError> {
        let record = self.claim(id)?;
        self.execute(record).await
    }

    /// Move a PENDING task to RUNNING. Exactly one caller wins; the others
    /// get `NotPending`.
    pub fn claim(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if record.status != TaskStatus::Pending {
            return Err(TaskError::NotPending {
                id: *id,
                status: record.status,
            });
        }

        match self.store.update_status(id, TaskStatus::Running) {
            Ok(record) => {
                info!(task_id = %id, task_type = %record.task_type, "task claimed");
                Ok(record)
            }
            // lost the race against another claim
            Err(TaskError::InvalidTransition { from, .. }) => Err(TaskError::NotPending {
                id: *id,
                status: from,
            }),
            Err(e) => Err(e),
        }
    }

    /// End a claimed task as ERROR without running it.
    pub fn fail(&self, id: &TaskId, cause: &TaskError) -> Result<(), TaskError> {
        error!(task_id = %id, error = %cause, "task abandoned before it started");
        let mut out = TaskOutput::new(*id, self.store.clone());
        if let Err(e) = out.line(&format!("Error: {cause}")) {
            warn!(task_id = %id, error = %e, "could not record task error");
        }
        self.store.update_status(id, TaskStatus::Error)?;
        Ok(())
    }

    /// Run the handler for a claimed (RUNNING) task and record the outcome.
    pub async fn execute(&self, record: TaskRecord) -> Result<bool, TaskError> {
        let id = &record.id;
        if record.status != TaskStatus::Running {
            return Err(TaskError::NotPending {
                id: *id,
                status: record.status,
            });
        }
        info!(task_id = %id, task_type = %record.task_type, "task started");

        let mut out = TaskOutput::new(*id, self.store.clone());
        if let Some(dir) = &self.log_dir {
            let path = dir.join(format!("{id}.log"));
            if let Err(e) = out.mirror_to(&path) {
                warn!(task_id = %id, error = %e, "task log file unavailable");
            }
        }

        let result = match self.registry.get(record.task_type.as_str()) {
            Some(handler) => handler.handle_dyn(record.metadata.clone(), &mut out).await,
            None => Err(TaskError::UnknownTaskType(record.task_type.to_string())),
        };

        let status = match result.and_then(|()| out.line(&format!("Task {id} finished: DONE"))) {
            Ok(()) => TaskStatus::Done,
            Err(e) => {
                error!(task_id = %id, error = %e, "task failed");
                if let Err(write_err) = out.line(&format!("Error: {e}")) {
                    warn!(task_id = %id, error = %write_err, "could not record task error");
                }
                TaskStatus::Error
            }
        };

        self.store.update_status(id, status)?;
        info!(task_id = %id, %status, "task finished");
        Ok(status == TaskStatus::Done)
    }
}
