//! ProcessSpawner backed by `std::process`.

use std::fs::OpenOptions;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::domain::TaskError;
use crate::ports::{ProcessHandle, ProcessSpawner, SpawnRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStrategy {
    /// New session, no inherited stdio, caller returns immediately.
    Detached,
    /// Caller waits for exit and captures stdout/stderr.
    Blocking,
}

#[derive(Debug, Clone)]
pub struct OsProcessSpawner {
    strategy: SpawnStrategy,
}

impl OsProcessSpawner {
    pub fn new(strategy: SpawnStrategy) -> Self {
        Self { strategy }
    }

    /// Detached when `forking_available`, blocking otherwise.
    pub fn for_forking(forking_available: bool) -> Self {
        if forking_available {
            Self::new(SpawnStrategy::Detached)
        } else {
            Self::new(SpawnStrategy::Blocking)
        }
    }

    fn command(&self, request: &SpawnRequest) -> Command {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args).envs(&request.env);
        if !request.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&request.working_dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            let new_session = self.strategy == SpawnStrategy::Detached;
            let inherit_fd = request.inherit_fd;
            // SAFETY: runs between fork and exec; only setsid and fcntl are called.
            unsafe {
                cmd.pre_exec(move || {
                    if new_session && libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if let Some(fd) = inherit_fd {
                        crate::impls::file_lock::set_fd_inheritable(fd, true)?;
                    }
                    Ok(())
                });
            }
        }

        cmd
    }

    fn spawn_detached(&self, request: &SpawnRequest) -> Result<ProcessHandle, TaskError> {
        let mut cmd = self.command(request);
        cmd.stdin(Stdio::null()).stdout(Stdio::null());

        match &request.stderr_log {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| TaskError::storage(parent, e))?;
                }
                let log = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| TaskError::storage(path, e))?;
                cmd.stderr(log);
            }
            None => {
                cmd.stderr(Stdio::null());
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| TaskError::storage(&request.program, e))?;
        info!(pid = child.id(), command = %request.command_line(), "worker started in background");

        Ok(ProcessHandle::detached(
            request.command_line(),
            child,
            request.stderr_log.clone(),
        ))
    }

    fn spawn_blocking(&self, request: &SpawnRequest) -> Result<ProcessHandle, TaskError> {
        warn!("Forking disabled by configuration, execution will block until the command has finished.");

        let output = self
            .command(request)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TaskError::storage(&request.program, e))?;

        let exit_code = output.status.code().unwrap_or(-1);
        info!(exit_code, command = %request.command_line(), "worker finished");

        Ok(ProcessHandle::finished(
            request.command_line(),
            exit_code,
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl Default for OsProcessSpawner {
    fn default() -> Self {
        Self::new(SpawnStrategy::Detached)
    }
}

impl ProcessSpawner for OsProcessSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle, TaskError> {
        match self.strategy {
            SpawnStrategy::Detached => self.spawn_detached(request),
            SpawnStrategy::Blocking => self.spawn_blocking(request),
        }
    }

    fn is_detached(&self) -> bool {
        self.strategy == SpawnStrategy::Detached
    }
}
