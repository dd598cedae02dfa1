//! Subcommand dispatch.
//!
//! Queue commands print one JSON envelope on stdout and exit 1 when it is an
//! error. `runtask` prints nothing; it exits 1 when the task ends ERROR.

use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::warn;

use tenside_core::app::{
    App, ApiResponse, AppBuilder, TaskQueue, WorkerLock, parse_task_id, task_run_lock,
};
use tenside_core::impls::{FileLock, LockGuard};
use tenside_core::tasks::{BUILTIN_TASKS, PackageManager};
use tenside_core::{Settings, TaskError};

use crate::cli::{CliArgs, Command};

pub fn dispatch(args: CliArgs) -> Result<ExitCode> {
    let home = match args.home {
        Some(home) => home,
        None => std::env::current_dir().context("resolving home directory")?,
    };
    let settings = Settings::load(&home)
        .with_context(|| format!("loading settings from {}", home.display()))?;
    let app = AppBuilder::new()
        .with_builtin_tasks(PackageManager::from_settings(&settings))?
        .expect_tasks(&BUILTIN_TASKS)
        .build()?;

    match args.command {
        Command::RunTask {
            id,
            lock_fd,
            lock_held,
        } => run_task(&app, &settings, &id, WorkerLock::from_flags(lock_fd, lock_held)),
        command => {
            let response = match app.queue(&settings) {
                Ok(queue) => serve(&queue, command),
                Err(e) => ApiResponse::error(&e),
            };
            println!("{}", response.to_json());
            Ok(if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn serve(queue: &TaskQueue, command: Command) -> ApiResponse {
    let result = match command {
        Command::List => queue.list_tasks().map(ApiResponse::tasks),
        Command::Show { id, offset } => parse_task_id(&id)
            .and_then(|id| queue.get_task(&id, offset))
            .map(ApiResponse::task),
        Command::Add { payload } => read_payload(&payload)
            .and_then(|body| queue.enqueue_payload(&body))
            .map(ApiResponse::created),
        Command::Delete { id } => parse_task_id(&id)
            .and_then(|id| queue.delete_task(&id))
            .map(|()| ApiResponse::ok()),
        Command::Run => queue.run_next().map(ApiResponse::task),
        Command::RunTask { .. } => Err(TaskError::InvalidPayload(
            "runtask is not a queue operation".to_string(),
        )),
    };
    ApiResponse::from(result)
}

fn read_payload(arg: &str) -> Result<String, TaskError> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut body = String::new();
    std::io::stdin()
        .read_to_string(&mut body)
        .map_err(|e| TaskError::InvalidPayload(format!("reading stdin: {e}")))?;
    Ok(body)
}

fn run_task(app: &App, settings: &Settings, raw_id: &str, lock: WorkerLock) -> Result<ExitCode> {
    let id = parse_task_id(raw_id)?;
    let runner = app.runner(settings)?;
    let run_lock = task_run_lock(settings);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    // held until the task is final
    let (_guard, record) = match lock {
        WorkerLock::Inherited(fd) => {
            let guard = adopt(&run_lock, fd)?;
            (Some(guard), runner.claim(&id)?)
        }
        WorkerLock::HeldByLauncher => (None, runner.claim(&id)?),
        WorkerLock::ClaimThenAcquire => {
            let record = match runner.claim(&id) {
                Ok(record) => record,
                // another worker got to it first
                Err(TaskError::NotPending { id, status }) => {
                    warn!(task_id = %id, %status, "task is no longer pending, nothing to do");
                    return Ok(ExitCode::SUCCESS);
                }
                Err(e) => return Err(e.into()),
            };
            let acquired = run_lock
                .acquire_within(settings.lock_wait)
                .and_then(|guard| guard.ok_or(TaskError::AlreadyRunning));
            match acquired {
                Ok(guard) => (Some(guard), record),
                Err(e) => {
                    runner.fail(&id, &e)?;
                    return Err(anyhow::Error::new(e)
                        .context(format!("waiting for {}", run_lock.path().display())));
                }
            }
        }
    };

    Ok(if runtime.block_on(runner.execute(record))? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(unix)]
fn adopt(lock: &FileLock, fd: i32) -> Result<LockGuard> {
    let guard = lock.adopt(fd)?;
    tracing::info!(fd, path = %lock.path().display(), "adopted task-run lock");
    Ok(guard)
}

#[cfg(not(unix))]
fn adopt(_lock: &FileLock, _fd: i32) -> Result<LockGuard> {
    Err(TaskError::Config("--lock-fd is only supported on unix".to_string()).into())
}
