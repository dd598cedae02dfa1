//! TaskQueue - API 層から使うキュー操作
//!
//! The serving side never executes task work. `run_next` takes the task-run
//! lock, picks the oldest PENDING task and starts `<cli> runtask <id>` as a
//! separate process.
//!
//! The lock is held across every launch, so two concurrent `run_next` calls
//! start at most one worker.
//!
//! # ロックの受け渡し
//! - `lock_handoff = true`: the worker inherits the locked descriptor and
//!   keeps the lock until it exits. The launcher closes its copy without
//!   unlocking once the worker has claimed the task.
//! - `lock_handoff = false`, detached: the launcher unlocks once the worker
//!   has claimed the task; the worker then locks on its own.
//! - `lock_handoff = false`, blocking: the launcher keeps the lock until the
//!   worker exits and the worker does not lock at all.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::api::TaskView;
use crate::config::Settings;
use crate::domain::{Metadata, TaskError, TaskId, TaskRecord, TaskStatus, TaskType};
use crate::impls::{FileLock, LockGuard};
use crate::ports::{ProcessHandle, ProcessSpawner, SpawnRequest, TaskStore};

pub const TASK_RUN_LOCK: &str = "task-run";

const CLAIM_POLL: Duration = Duration::from_millis(50);

/// The task-run lock for a configured home.
pub fn task_run_lock(settings: &Settings) -> FileLock {
    FileLock::new(&settings.data_dir, TASK_RUN_LOCK)
}

/// Ids arrive as strings from clients; anything unparsable names no task.
pub fn parse_task_id(raw: &str) -> Result<TaskId, TaskError> {
    raw.parse()
        .map_err(|_| TaskError::NotFound(raw.to_string()))
}

/// How a worker comes to hold the task-run lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLock {
    /// Inherits the launcher's locked descriptor (`--lock-fd N`).
    Inherited(i32),
    /// The launcher holds the lock until the worker exits (`--lock-held`).
    HeldByLauncher,
    /// Claims the task first, then waits for the lock itself.
    ClaimThenAcquire,
}

impl WorkerLock {
    /// From the `runtask` flags.
    pub fn from_flags(lock_fd: Option<i32>, lock_held: bool) -> Self {
        match (lock_fd, lock_held) {
            (Some(fd), _) => WorkerLock::Inherited(fd),
            (None, true) => WorkerLock::HeldByLauncher,
            (None, false) => WorkerLock::ClaimThenAcquire,
        }
    }

    fn inherit_fd(self) -> Option<i32> {
        match self {
            WorkerLock::Inherited(fd) => Some(fd),
            _ => None,
        }
    }

    fn args(self) -> Vec<String> {
        match self {
            WorkerLock::Inherited(fd) => vec!["--lock-fd".to_string(), fd.to_string()],
            WorkerLock::HeldByLauncher => vec!["--lock-held".to_string()],
            WorkerLock::ClaimThenAcquire => Vec::new(),
        }
    }
}

/// How to start a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub home: PathBuf,
    pub leading_args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub log_dir: Option<PathBuf>,
    pub lock_handoff: bool,
    pub claim_timeout: Duration,
}

impl WorkerCommand {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            program: settings.cli_executable.clone(),
            home: settings.home.clone(),
            leading_args: settings.worker_arguments.clone(),
            env: settings.worker_environment.clone(),
            log_dir: Some(settings.log_dir.clone()),
            lock_handoff: settings.lock_handoff,
            claim_timeout: settings.claim_timeout,
        }
    }

    /// `<cli> [leading args] --home <home> runtask <id> -v --no-interaction [--lock-fd N | --lock-held]`
    pub fn request(&self, id: &TaskId, lock: WorkerLock) -> SpawnRequest {
        let mut args = self.leading_args.clone();
        args.extend([
            "--home".to_string(),
            self.home.display().to_string(),
            "runtask".to_string(),
            id.to_string(),
            "-v".to_string(),
            "--no-interaction".to_string(),
        ]);
        args.extend(lock.args());

        SpawnRequest {
            program: self.program.clone(),
            args,
            working_dir: self.home.clone(),
            env: self.env.clone(),
            inherit_fd: lock.inherit_fd(),
            stderr_log: self
                .log_dir
                .as_ref()
                .map(|dir| dir.join(format!("{id}.worker.log"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Claim {
    Claimed,
    Exited(i32),
    TimedOut,
}

pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    spawner: Arc<dyn ProcessSpawner>,
    run_lock: FileLock,
    worker: WorkerCommand,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn TaskStore>,
        spawner: Arc<dyn ProcessSpawner>,
        run_lock: FileLock,
        worker: WorkerCommand,
    ) -> Self {
        Self {
            store,
            spawner,
            run_lock,
            worker,
        }
    }

    /// Every task in insertion order, with full output.
    pub fn list_tasks(&self) -> Result<Vec<TaskView>, TaskError> {
        let mut views = Vec::new();
        for id in self.store.ids()? {
            match self.store.get(&id)? {
                Some(record) => views.push(self.view(&record, 0)?),
                None => warn!(task_id = %id, "listed task has no record, skipping"),
            }
        }
        Ok(views)
    }

    /// One task; `offset` skips that many bytes of output.
    pub fn get_task(&self, id: &TaskId, offset: Option<u64>) -> Result<TaskView, TaskError> {
        let record = self.record(id)?;
        self.view(&record, offset.unwrap_or(0))
    }

    pub fn enqueue(&self, task_type: &TaskType, metadata: Metadata) -> Result<TaskView, TaskError> {
        let id = self.store.enqueue(task_type, metadata)?;
        self.get_task(&id, None)
    }

    /// Queue from a raw request body: a JSON object with a string `type`.
    /// The whole body becomes the task metadata.
    pub fn enqueue_payload(&self, body: &str) -> Result<TaskView, TaskError> {
        if body.trim().is_empty() {
            return Err(TaskError::InvalidPayload("empty body".to_string()));
        }
        let value: Value = serde_json::from_str(body)
            .map_err(|e| TaskError::InvalidPayload(e.to_string()))?;
        let Value::Object(metadata) = value else {
            return Err(TaskError::InvalidPayload("body must be a JSON object".to_string()));
        };
        let task_type = match metadata.get("type") {
            Some(Value::String(t)) => TaskType::new(t.as_str()),
            _ => {
                return Err(TaskError::InvalidPayload(
                    "missing string field 'type'".to_string(),
                ));
            }
        };
        self.enqueue(&task_type, metadata)
    }

    pub fn delete_task(&self, id: &TaskId) -> Result<(), TaskError> {
        self.store.remove(id)
    }

    /// Start the oldest PENDING task in a worker process.
    ///
    /// Fails with `AlreadyRunning` while another launch or task holds the
    /// lock and with `NoPendingTask` when the queue is drained. On a detached
    /// spawn the call returns once the worker has marked the task RUNNING;
    /// on a blocking spawn it returns after the worker exits. A worker that
    /// never claims its task is reported as `SpawnFailed` and the task stays
    /// PENDING.
    pub fn run_next(&self) -> Result<TaskView, TaskError> {
        let Some(guard) = self.run_lock.try_acquire()? else {
            debug!(holder = ?self.run_lock.holder_pid(), "task-run lock is busy");
            return Err(TaskError::AlreadyRunning);
        };

        let record = self.store.get_next()?.ok_or(TaskError::NoPendingTask)?;
        if record.status != TaskStatus::Pending {
            return self.view(&record, 0);
        }
        let id = record.id;

        let lock = self.worker_lock(&guard);
        let request = self.worker.request(&id, lock);
        info!(task_id = %id, command = %request.command_line(), "launching worker");
        let mut handle = self.spawner.spawn(&request).map_err(|e| TaskError::SpawnFailed {
            task: id,
            message: e.to_string(),
            exit_code: None,
            stderr: String::new(),
        })?;

        if !handle.is_handed_off() {
            drop(guard);
            let record = self.record(&id)?;
            if record.status == TaskStatus::Pending {
                return Err(spawn_failed(id, &mut handle, "exited without claiming the task"));
            }
            if !record.status.is_terminal() {
                warn!(task_id = %id, status = %record.status, "worker exited before finishing the task");
            }
            return self.view(&record, 0);
        }

        let claim = self.await_claim(&id, &mut handle)?;
        match (claim, lock) {
            // the worker owns the descriptor from here on
            (Claim::Claimed | Claim::TimedOut, WorkerLock::Inherited(_)) => guard.hand_off(),
            _ => drop(guard),
        }
        match claim {
            Claim::Claimed => {}
            Claim::Exited(code) => {
                debug!(task_id = %id, exit_code = code, "worker exited early");
                return Err(spawn_failed(id, &mut handle, "exited before claiming the task"));
            }
            Claim::TimedOut => {
                let reason = format!(
                    "did not claim the task within {} ms",
                    self.worker.claim_timeout.as_millis()
                );
                return Err(spawn_failed(id, &mut handle, &reason));
            }
        }

        let record = self.record(&id)?;
        self.view(&record, 0)
    }

    fn worker_lock(&self, guard: &LockGuard) -> WorkerLock {
        let fd = if self.worker.lock_handoff {
            handoff_fd(guard)
        } else {
            None
        };
        match fd {
            Some(fd) => WorkerLock::Inherited(fd),
            None if self.spawner.is_detached() => WorkerLock::ClaimThenAcquire,
            // the launcher waits for the worker, so the worker must not wait for the lock
            None => WorkerLock::HeldByLauncher,
        }
    }

    fn await_claim(&self, id: &TaskId, handle: &mut ProcessHandle) -> Result<Claim, TaskError> {
        let deadline = Instant::now() + self.worker.claim_timeout;
        loop {
            if self.is_claimed(id)? {
                return Ok(Claim::Claimed);
            }
            if let Some(code) = handle.exit_code() {
                // the worker may have claimed and finished between the two checks
                if self.is_claimed(id)? {
                    return Ok(Claim::Claimed);
                }
                return Ok(Claim::Exited(code));
            }
            if Instant::now() >= deadline {
                warn!(task_id = %id, timeout_ms = self.worker.claim_timeout.as_millis() as u64, "worker has not claimed the task yet");
                return Ok(Claim::TimedOut);
            }
            std::thread::sleep(CLAIM_POLL);
        }
    }

    fn is_claimed(&self, id: &TaskId) -> Result<bool, TaskError> {
        Ok(self
            .store
            .get(id)?
            .is_none_or(|record| record.status != TaskStatus::Pending))
    }

    fn record(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        self.store
            .get(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    fn view(&self, record: &TaskRecord, offset: u64) -> Result<TaskView, TaskError> {
        let output = self.store.read_output(&record.id, offset)?;
        Ok(TaskView::new(record, output))
    }
}

fn spawn_failed(task: TaskId, handle: &mut ProcessHandle, reason: &str) -> TaskError {
    TaskError::SpawnFailed {
        task,
        message: format!("`{}` {reason}", handle.command_line()),
        exit_code: handle.exit_code(),
        stderr: handle.stderr(),
    }
}

#[cfg(unix)]
fn handoff_fd(guard: &LockGuard) -> Option<i32> {
    guard.inheritable_fd()
}

#[cfg(not(unix))]
fn handoff_fd(_guard: &LockGuard) -> Option<i32> {
    None
}
