//! Advisory lock on the global queue
//!
//! The coordinator is the only writer of the global queue during its
//! read-shuffle-clear window, but external producers may append at any
//! time. Both sides take this lock so an append cannot land between the
//! coordinator's read and its clear.
//!
//! - Polls with a configurable timeout
//! - Logs contention once it lasts longer than half a second
//! - Released when the guard is dropped

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for queue lock {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("I/O error on queue lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive advisory lock held on a lock file.
pub struct QueueLock {
    lock_path: PathBuf,
    #[allow(dead_code)]
    lock_file: File,
}

impl QueueLock {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);
    const CONTENTION_WARNING: Duration = Duration::from_millis(500);

    /// Acquire the lock at `lock_path`, creating the file if needed.
    ///
    /// Waits up to `timeout` for a concurrent holder to release it.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> LockResult<Self> {
        let start = Instant::now();
        let mut warned = false;

        loop {
            match Self::try_acquire_exclusive(lock_path) {
                Ok(file) => {
                    if warned {
                        debug!(
                            path = %lock_path.display(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "queue lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        lock_path: lock_path.to_path_buf(),
                        lock_file: file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Self::CONTENTION_WARNING {
                        warn!(path = %lock_path.display(), "queue lock contended, waiting");
                        warned = true;
                    }
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: lock_path.to_path_buf(),
                        source,
                    })
                }
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: lock_path.to_path_buf(),
                    timeout,
                });
            }

            std::thread::sleep(Self::POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(lock_path)?;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

        if result == 0 {
            Ok(file)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            } else {
                Err(err)
            }
        }
    }

    /// Non-Unix fallback: exclusive creation, removed again on drop.
    #[cfg(not(unix))]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        match OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            }
            Err(e) => Err(e),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

impl std::fmt::Debug for QueueLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueLock").field("path", &self.lock_path).finish()
    }
}
