//! TaskOutput - handler 用の出力シンク
//!
//! Everything written here is appended to the record's output log right
//! away, so a client polling with an offset sees progress while the task is
//! still RUNNING. A copy goes to the per-task log file when one is attached.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::{TaskError, TaskId};
use crate::ports::TaskStore;

const CHUNK_SIZE: usize = 4096;

pub struct TaskOutput {
    id: TaskId,
    store: Arc<dyn TaskStore>,
    mirror: Option<File>,
}

impl TaskOutput {
    pub fn new(id: TaskId, store: Arc<dyn TaskStore>) -> Self {
        Self {
            id,
            store,
            mirror: None,
        }
    }

    /// Also append everything to `path`.
    pub fn mirror_to(&mut self, path: &Path) -> Result<(), TaskError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TaskError::storage(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TaskError::storage(path, e))?;
        self.mirror = Some(file);
        Ok(())
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), TaskError> {
        self.store.append_output(&self.id, bytes)?;
        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = mirror.write_all(bytes) {
                warn!(task_id = %self.id, error = %e, "failed to mirror task output, detaching log file");
                self.mirror = None;
            }
        }
        Ok(())
    }

    pub fn line(&mut self, line: &str) -> Result<(), TaskError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write(&bytes)
    }

    /// Run `cmd` to completion, streaming stdout and stderr into the output
    /// in chunks as they arrive.
    ///
    /// A non-zero exit is `CommandFailed`; whatever the command printed
    /// before exiting is kept.
    pub async fn run_command(&mut self, mut cmd: Command) -> Result<(), TaskError> {
        let command = describe(&cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(task_id = %self.id, %command, "starting command");
        let mut child = cmd
            .spawn()
            .map_err(|e| TaskError::storage(cmd.as_std().get_program(), e))?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        while let Some(chunk) = rx.recv().await {
            self.write(&chunk)?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| TaskError::storage(cmd.as_std().get_program(), e))?;
        info!(task_id = %self.id, %command, exit_code = ?status.code(), "command exited");

        if status.success() {
            Ok(())
        } else {
            Err(TaskError::CommandFailed {
                command,
                exit_code: status.code(),
            })
        }
    }
}

impl std::fmt::Debug for TaskOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOutput")
            .field("id", &self.id)
            .field("mirrored", &self.mirror.is_some())
            .finish()
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read command output");
                break;
            }
        }
    }
}

fn describe(cmd: &Command) -> String {
    let std = cmd.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, TaskType};
    use crate::impls::FileTaskStore;
    use tempfile::{TempDir, tempdir};

    fn output() -> (TempDir, Arc<dyn TaskStore>, TaskOutput) {
        let dir = tempdir().unwrap();
        let store: Arc<dyn TaskStore> =
            Arc::new(FileTaskStore::open(dir.path().join("tasks"), ["upgrade"]).unwrap());
        let id = store
            .enqueue(&TaskType::new("upgrade"), Metadata::new())
            .unwrap();
        let out = TaskOutput::new(id, store.clone());
        (dir, store, out)
    }

    #[test]
    fn write_appends_to_store_and_mirror() {
        let (dir, store, mut out) = output();
        let log = dir.path().join("logs").join("task.log");
        out.mirror_to(&log).unwrap();

        out.write(b"partial").unwrap();
        out.line(" line").unwrap();

        let id = out.task_id();
        assert_eq!(store.read_output(&id, 0).unwrap(), "partial line\n");
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "partial line\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_streams_both_pipes() {
        let (_dir, store, mut out) = output();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo to-stdout; echo to-stderr >&2");

        out.run_command(cmd).await.unwrap();

        let text = store.read_output(&out.task_id(), 0).unwrap();
        assert!(text.contains("to-stdout\n"));
        assert!(text.contains("to-stderr\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_reports_exit_code_and_keeps_output() {
        let (_dir, store, mut out) = output();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo before-failure; exit 3");

        let err = out.run_command(cmd).await.unwrap_err();

        match err {
            TaskError::CommandFailed { command, exit_code } => {
                assert_eq!(exit_code, Some(3));
                assert!(command.starts_with("sh -c"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            store.read_output(&out.task_id(), 0).unwrap(),
            "before-failure\n"
        );
    }

    #[tokio::test]
    async fn run_command_missing_program_is_storage_error() {
        let (_dir, _store, mut out) = output();
        let cmd = Command::new("/nonexistent/package-manager");

        assert!(matches!(
            out.run_command(cmd).await,
            Err(TaskError::Storage { .. })
        ));
    }
}
