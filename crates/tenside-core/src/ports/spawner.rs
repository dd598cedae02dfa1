//! ProcessSpawner port - worker プロセスの起動
//!
//! The serving process never runs task work itself; it asks a spawner to
//! start `<cli> runtask <id>` as a separate process image.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};

use tracing::{debug, warn};

use crate::domain::TaskError;

/// What to launch.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Overlay on top of the caller's environment.
    pub env: BTreeMap<String, String>,
    /// Descriptor the child must inherit (the task-run lock on hand-off).
    pub inherit_fd: Option<i32>,
    /// Where a detached child's stderr is appended.
    pub stderr_log: Option<PathBuf>,
}

impl SpawnRequest {
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// ProcessSpawner は worker プロセスを起動
///
/// # 戦略
/// - detached: returns as soon as the child is started; the child outlives
///   the caller
/// - blocking: returns once the child has exited, with captured output
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle, TaskError>;

    /// Whether `spawn` hands the child off instead of waiting for it.
    fn is_detached(&self) -> bool;
}

/// Handle on a launched worker.
pub struct ProcessHandle {
    command_line: String,
    state: HandleState,
}

enum HandleState {
    Detached {
        child: Option<Child>,
        status: Option<ExitStatus>,
        stderr_log: Option<PathBuf>,
    },
    Finished {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

impl ProcessHandle {
    pub fn detached(command_line: String, child: Child, stderr_log: Option<PathBuf>) -> Self {
        Self {
            command_line,
            state: HandleState::Detached {
                child: Some(child),
                status: None,
                stderr_log,
            },
        }
    }

    pub fn finished(command_line: String, exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            command_line,
            state: HandleState::Finished {
                exit_code,
                stdout,
                stderr,
            },
        }
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// True when the child was started in the background and the caller
    /// did not wait for it.
    pub fn is_handed_off(&self) -> bool {
        matches!(self.state, HandleState::Detached { .. })
    }

    pub fn is_running(&mut self) -> bool {
        self.poll();
        match &self.state {
            HandleState::Detached { child, status, .. } => child.is_some() && status.is_none(),
            HandleState::Finished { .. } => false,
        }
    }

    /// Exit code, `None` while running. Death by signal reports -1.
    pub fn exit_code(&mut self) -> Option<i32> {
        self.poll();
        match &self.state {
            HandleState::Detached { status, .. } => status.map(|s| s.code().unwrap_or(-1)),
            HandleState::Finished { exit_code, .. } => Some(*exit_code),
        }
    }

    pub fn stdout(&self) -> String {
        match &self.state {
            HandleState::Detached { .. } => String::new(),
            HandleState::Finished { stdout, .. } => stdout.clone(),
        }
    }

    pub fn stderr(&self) -> String {
        match &self.state {
            HandleState::Detached { stderr_log, .. } => stderr_log
                .as_ref()
                .and_then(|path| std::fs::read_to_string(path).ok())
                .unwrap_or_default(),
            HandleState::Finished { stderr, .. } => stderr.clone(),
        }
    }

    fn poll(&mut self) {
        if let HandleState::Detached {
            child: Some(child),
            status,
            ..
        } = &mut self.state
        {
            if status.is_none() {
                match child.try_wait() {
                    Ok(exited) => *status = exited,
                    Err(e) => warn!(error = %e, "failed to poll worker process"),
                }
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let HandleState::Detached { child, status, .. } = &mut self.state {
            if status.is_some() {
                return;
            }
            // reap in the background so a long-lived caller does not collect zombies
            if let Some(mut child) = child.take() {
                let pid = child.id();
                std::thread::spawn(move || match child.wait() {
                    Ok(status) => debug!(pid, %status, "worker process exited"),
                    Err(e) => warn!(pid, error = %e, "failed to reap worker process"),
                });
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command_line", &self.command_line)
            .field("handed_off", &self.is_handed_off())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_handle_reports_captured_output() {
        let mut handle = ProcessHandle::finished(
            "tenside runtask task-x".into(),
            3,
            "out".into(),
            "err".into(),
        );

        assert!(!handle.is_handed_off());
        assert!(!handle.is_running());
        assert_eq!(handle.exit_code(), Some(3));
        assert_eq!(handle.stdout(), "out");
        assert_eq!(handle.stderr(), "err");
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let request = SpawnRequest {
            program: PathBuf::from("/usr/bin/tenside"),
            args: vec!["runtask".into(), "task-1".into(), "-v".into()],
            ..SpawnRequest::default()
        };
        assert_eq!(request.command_line(), "/usr/bin/tenside runtask task-1 -v");
    }
}
