//! Line-oriented queue store
//!
//! A queue is a plain text file holding one job per line. The cohort shares
//! queues through the filesystem only:
//!
//! - `<base>`: global intake queue, read and cleared by the coordinator
//! - `<base>.<rank>`: local queue of one worker
//! - `<base>.<rank>.failed`: jobs that failed on that worker
//!
//! Overwrites go through a temp file and a rename so a reader sees either
//! the old or the new contents, never a partial list. Nothing here guards
//! against two writers touching the same queue; the coordinator holds
//! [`QueueLock`] around its read-partition-clear window and external
//! producers are expected to take the same lock.

mod lock;

pub use lock::{LockError, LockResult, QueueLock};

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::job::Job;

/// Errors from queue store operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("I/O error on queue {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("job contains a newline and cannot be stored in {path}: {job:?}")]
    EmbeddedNewline { path: PathBuf, job: String },
}

/// Result type for queue store operations.
pub type QueueResult<T> = Result<T, QueueError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> QueueError + '_ {
    move |source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Named, ordered job queues.
pub trait QueueStore: Send + Sync {
    /// Whether the queue has been created.
    fn exists(&self, name: &Path) -> bool;

    /// Read every job in order. A missing queue reads as empty.
    fn read_all(&self, name: &Path) -> QueueResult<Vec<Job>>;

    /// Replace the queue's contents with `jobs`.
    fn write_all(&self, name: &Path, jobs: &[Job]) -> QueueResult<()>;

    /// True if the queue holds no jobs or does not exist.
    fn is_empty(&self, name: &Path) -> QueueResult<bool> {
        Ok(self.read_all(name)?.is_empty())
    }

    /// Create an empty queue if none exists yet.
    fn ensure_exists(&self, name: &Path) -> QueueResult<()> {
        if self.exists(name) {
            Ok(())
        } else {
            self.write_all(name, &[])
        }
    }

    /// Add `jobs` after the queue's current contents.
    fn append(&self, name: &Path, jobs: &[Job]) -> QueueResult<()> {
        let mut all = self.read_all(name)?;
        all.extend_from_slice(jobs);
        self.write_all(name, &all)
    }
}

/// Queue store backed by newline-terminated text files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileQueueStore;

impl FileQueueStore {
    pub fn new() -> Self {
        Self
    }
}

impl QueueStore for FileQueueStore {
    fn exists(&self, name: &Path) -> bool {
        name.is_file()
    }

    fn read_all(&self, name: &Path) -> QueueResult<Vec<Job>> {
        let file = match File::open(name) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(name)(e)),
        };

        let mut jobs = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_error(name))?;
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if line.trim().is_empty() {
                continue;
            }
            jobs.push(Job::from(line));
        }
        Ok(jobs)
    }

    fn write_all(&self, name: &Path, jobs: &[Job]) -> QueueResult<()> {
        if let Some(job) = jobs.iter().find(|j| j.as_str().contains('\n')) {
            return Err(QueueError::EmbeddedNewline {
                path: name.to_path_buf(),
                job: job.to_string(),
            });
        }

        let temp_path = with_suffix(name, ".tmp");
        {
            let file = File::create(&temp_path).map_err(io_error(&temp_path))?;
            let mut writer = BufWriter::new(file);
            for job in jobs {
                writeln!(writer, "{}", job).map_err(io_error(&temp_path))?;
            }
            writer.flush().map_err(io_error(&temp_path))?;
        }

        fs::rename(&temp_path, name).map_err(io_error(name))
    }
}

/// `path` with `suffix` appended to its final component.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// File names derived from the base queue path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    base: PathBuf,
}

impl QueueNames {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The global intake queue.
    pub fn global(&self) -> &Path {
        &self.base
    }

    /// Local queue of `rank`.
    pub fn local(&self, rank: usize) -> PathBuf {
        with_suffix(&self.base, &format!(".{}", rank))
    }

    /// Failure log of `rank`.
    pub fn failed(&self, rank: usize) -> PathBuf {
        with_suffix(&self.local(rank), ".failed")
    }

    /// Presence of this file asks the cohort to stop.
    pub fn terminate(&self) -> PathBuf {
        with_suffix(&self.base, ".terminate")
    }

    /// Advisory lock guarding the global queue.
    pub fn lock(&self) -> PathBuf {
        with_suffix(&self.base, ".lock")
    }

    /// Run summary written when the cohort stops.
    pub fn summary(&self) -> PathBuf {
        with_suffix(&self.base, ".summary.json")
    }

    /// Config file picked up next to the queue when `--config` is absent.
    pub fn config(&self) -> PathBuf {
        with_suffix(&self.base, ".toml")
    }
}
