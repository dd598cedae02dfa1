//! File-backed cross-process lock.
//!
//! On unix the lock is a `flock(2)` on `<dir>/<name>.lock`. The kernel ties
//! it to the open file description, so a holder that dies releases it, and a
//! child that inherits the descriptor keeps holding it after the parent
//! closes its copy (hand-off).

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::domain::TaskError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Named lock living in a directory.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{name}.lock")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking. `None` when another holder has it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>, TaskError> {
        let file = self.open()?;
        let locked = sys::try_lock(&file).map_err(|e| TaskError::storage(&self.path, e))?;
        if !locked {
            return Ok(None);
        }
        let mut guard = LockGuard {
            file: Some(file),
            path: self.path.clone(),
        };
        guard.record_holder();
        Ok(Some(guard))
    }

    /// Blocks until the lock is free.
    pub fn acquire(&self) -> Result<LockGuard, TaskError> {
        let file = self.open()?;
        sys::lock(&file).map_err(|e| TaskError::storage(&self.path, e))?;
        Ok(LockGuard {
            file: Some(file),
            path: self.path.clone(),
        })
    }

    /// Polls `try_acquire` until `timeout` elapses.
    pub fn acquire_within(&self, timeout: Duration) -> Result<Option<LockGuard>, TaskError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Take over a lock descriptor inherited from the launching process.
    #[cfg(unix)]
    pub fn adopt(&self, fd: i32) -> Result<LockGuard, TaskError> {
        use std::os::unix::io::FromRawFd;

        if !sys::is_open(fd) {
            return Err(TaskError::Config(format!(
                "inherited lock descriptor {fd} is not open"
            )));
        }
        // SAFETY: the descriptor is open and was passed to us for exclusive use.
        let file = unsafe { File::from_raw_fd(fd) };
        sys::set_inheritable(&file, false).map_err(|e| TaskError::storage(&self.path, e))?;

        // Re-locking the same open file description succeeds; anything else
        // means the descriptor is not the one holding the lock.
        let locked = sys::try_lock(&file).map_err(|e| TaskError::storage(&self.path, e))?;
        if !locked {
            return Err(TaskError::Config(format!(
                "inherited descriptor {fd} does not hold {}",
                self.path.display()
            )));
        }
        let mut guard = LockGuard {
            file: Some(file),
            path: self.path.clone(),
        };
        guard.record_holder();
        Ok(guard)
    }

    /// Pid written by the current (or last) holder, if any.
    pub fn holder_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn open(&self) -> Result<File, TaskError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TaskError::storage(parent, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| TaskError::storage(&self.path, e))
    }
}

/// Held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard {
    pub fn release(mut self) {
        self.unlock();
    }

    /// Close this process's descriptor without unlocking. A child that
    /// inherited the descriptor keeps the lock until it exits.
    pub fn hand_off(mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "lock handed off");
        }
    }

    /// Raw descriptor to pass to a child process.
    #[cfg(unix)]
    pub fn inheritable_fd(&self) -> Option<i32> {
        use std::os::unix::io::AsRawFd;

        self.file.as_ref().map(|f| f.as_raw_fd())
    }

    fn record_holder(&mut self) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let result = file
            .set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| write!(file, "{}", std::process::id()))
            .and_then(|_| file.flush());
        if let Err(e) = result {
            debug!(path = %self.path.display(), error = %e, "could not record lock holder");
        }
    }

    fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = sys::unlock(&file) {
                warn!(path = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn try_lock(file: &File) -> io::Result<bool> {
        // SAFETY: plain syscall on a descriptor we own.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub fn lock(file: &File) -> io::Result<()> {
        loop {
            // SAFETY: plain syscall on a descriptor we own.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: plain syscall on a descriptor we own.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn is_open(fd: i32) -> bool {
        // SAFETY: F_GETFD only inspects the descriptor table.
        unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
    }

    pub fn set_inheritable(file: &File, inheritable: bool) -> io::Result<()> {
        super::set_fd_inheritable(file.as_raw_fd(), inheritable)
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::{File, TryLockError};
    use std::io;

    pub fn try_lock(file: &File) -> io::Result<bool> {
        match file.try_lock() {
            Ok(()) => Ok(true),
            Err(TryLockError::WouldBlock) => Ok(false),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }

    pub fn lock(file: &File) -> io::Result<()> {
        file.lock()
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        file.unlock()
    }
}

/// Toggle `FD_CLOEXEC` on a raw descriptor.
///
/// Also called between fork and exec when spawning a worker, so it only
/// uses async-signal-safe calls.
#[cfg(unix)]
pub(crate) fn set_fd_inheritable(fd: i32, inheritable: bool) -> std::io::Result<()> {
    // SAFETY: fcntl on a caller-provided descriptor; failures are reported.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let flags = if inheritable {
            flags & !libc::FD_CLOEXEC
        } else {
            flags | libc::FD_CLOEXEC
        };
        if libc::fcntl(fd, libc::F_SETFD, flags) == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
