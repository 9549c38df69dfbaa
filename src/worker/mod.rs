//! Local worker loop
//!
//! Each worker drains its own local queue without talking to its peers.
//! After every job the remaining queue is written back, so a crash loses at
//! most the job that was running. Failed jobs are collected for the
//! worker's lifetime and the whole list is rewritten to the failure log on
//! every new failure.
//!
//! A new worker reads an existing failure log once to seed that list, so
//! the log keeps growing across restarts. Nothing else reads it back.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::job::{Job, JobExecutor, JobOutcome};
use crate::queue::{QueueError, QueueNames, QueueStore};

/// Errors from the local worker loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {rank}: {source}")]
    Queue {
        rank: usize,
        #[source]
        source: QueueError,
    },
}

/// Result type for local worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Counters for one drain of the local queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Jobs handed to the executor
    pub executed: usize,
    /// Jobs that exited zero
    pub succeeded: usize,
    /// Jobs recorded in the failure log
    pub failed: usize,
    /// Stopped early on request, leaving jobs in the local queue
    pub interrupted: bool,
}

/// One worker's view of its local queue and failure log.
pub struct LocalWorker<'a> {
    rank: usize,
    queue: PathBuf,
    failure_log: PathBuf,
    store: &'a dyn QueueStore,
    executor: &'a dyn JobExecutor,
    failures: Vec<Job>,
}

impl<'a> LocalWorker<'a> {
    /// Create the worker for `rank`, seeding the failure list from any
    /// existing failure log.
    pub fn new(
        rank: usize,
        names: &QueueNames,
        store: &'a dyn QueueStore,
        executor: &'a dyn JobExecutor,
    ) -> Self {
        let failure_log = names.failed(rank);
        let failures = match store.read_all(&failure_log) {
            Ok(failures) => failures,
            Err(e) => {
                warn!(rank, error = %e, "could not read previous failure log, starting a new one");
                Vec::new()
            }
        };

        Self {
            rank,
            queue: names.local(rank),
            failure_log,
            store,
            executor,
            failures,
        }
    }

    pub fn queue(&self) -> &Path {
        &self.queue
    }

    /// Whether the local queue holds jobs.
    pub fn has_work(&self) -> WorkerResult<bool> {
        self.store
            .is_empty(&self.queue)
            .map(|empty| !empty)
            .map_err(|source| self.queue_error(source))
    }

    /// Execute every job in the local queue.
    ///
    /// Jobs are taken from the back of the loaded list. `stop` is checked
    /// between jobs; when it returns true the drain ends with the rest of
    /// the queue already persisted. An empty queue is a no-op: nothing is
    /// written.
    pub fn drain(&mut self, stop: &dyn Fn() -> bool) -> WorkerResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut jobs = self
            .store
            .read_all(&self.queue)
            .map_err(|source| self.queue_error(source))?;

        if jobs.is_empty() {
            return Ok(report);
        }

        info!(
            rank = self.rank,
            jobs = jobs.len(),
            queue = %self.queue.display(),
            "draining local queue"
        );

        while let Some(job) = jobs.pop() {
            info!(rank = self.rank, "Execute = '{}'", job);
            report.executed += 1;

            let failed = match self.executor.run(&job) {
                JobOutcome::Success => {
                    report.succeeded += 1;
                    false
                }
                JobOutcome::Failure { exit_code } => {
                    warn!(rank = self.rank, job = %job, exit_code = ?exit_code, "job failed");
                    report.failed += 1;
                    self.failures.push(job);
                    true
                }
            };

            // The queue goes first: a job that ran must never stay queued.
            self.store
                .write_all(&self.queue, &jobs)
                .map_err(|source| self.queue_error(source))?;
            if failed {
                self.store
                    .write_all(&self.failure_log, &self.failures)
                    .map_err(|source| self.queue_error(source))?;
            }

            if !jobs.is_empty() && stop() {
                info!(
                    rank = self.rank,
                    remaining = jobs.len(),
                    "stop requested, leaving remaining jobs in local queue"
                );
                report.interrupted = true;
                break;
            }
        }

        Ok(report)
    }

    fn queue_error(&self, source: QueueError) -> WorkerError {
        WorkerError::Queue {
            rank: self.rank,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{FileQueueStore, QueueResult};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fails every job listed in `failing`, records call order.
    struct ScriptedExecutor {
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl JobExecutor for ScriptedExecutor {
        fn run(&self, job: &Job) -> JobOutcome {
            self.calls.lock().unwrap().push(job.to_string());
            if self.failing.contains(job.as_str()) {
                JobOutcome::Failure { exit_code: Some(1) }
            } else {
                JobOutcome::Success
            }
        }
    }

    fn jobs(items: &[&str]) -> Vec<Job> {
        items.iter().map(|s| Job::from(*s)).collect()
    }

    #[test]
    fn test_drain_runs_back_to_front() {
        let temp = TempDir::new().unwrap();
        let store = FileQueueStore::new();
        let names = QueueNames::new(temp.path().join("q"));
        store.write_all(&names.local(0), &jobs(&["a", "b", "c"])).unwrap();

        let executor = ScriptedExecutor::new(&[]);
        let mut worker = LocalWorker::new(0, &names, &store, &executor);
        let report = worker.drain(&|| false).unwrap();

        assert_eq!(executor.calls(), vec!["c", "b", "a"]);
        assert_eq!(report.executed, 3);
        assert_eq!(report.succeeded, 3);
        assert!(!report.interrupted);
        assert!(store.is_empty(&names.local(0)).unwrap());
        assert!(!store.exists(&names.failed(0)));
    }

    #[test]
    fn test_drain_empty_queue_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = FileQueueStore::new();
        let names = QueueNames::new(temp.path().join("q"));

        let executor = ScriptedExecutor::new(&[]);
        let mut worker = LocalWorker::new(1, &names, &store, &executor);

        assert!(!worker.has_work().unwrap());
        assert_eq!(worker.drain(&|| false).unwrap(), DrainReport::default());
        assert!(executor.calls().is_empty());
        assert!(!store.exists(&names.local(1)));
        assert!(!store.exists(&names.failed(1)));
    }

    #[test]
    fn test_failures_are_logged_and_not_requeued() {
        let temp = TempDir::new().unwrap();
        let store = FileQueueStore::new();
        let names = QueueNames::new(temp.path().join("q"));
        store.write_all(&names.local(0), &jobs(&["ok1", "bad1", "ok2", "bad2"])).unwrap();

        let executor = ScriptedExecutor::new(&["bad1", "bad2"]);
        let mut worker = LocalWorker::new(0, &names, &store, &executor);
        let report = worker.drain(&|| false).unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(store.read_all(&names.failed(0)).unwrap(), jobs(&["bad2", "bad1"]));
        assert!(store.read_all(&names.local(0)).unwrap().is_empty());
    }

    #[test]
    fn test_failure_log_accumulates_across_drains_and_restarts() {
        let temp = TempDir::new().unwrap();
        let store = FileQueueStore::new();
        let names = QueueNames::new(temp.path().join("q"));
        let executor = ScriptedExecutor::new(&["bad1", "bad2", "bad3"]);

        {
            let mut worker = LocalWorker::new(0, &names, &store, &executor);
            store.write_all(&names.local(0), &jobs(&["bad1"])).unwrap();
            worker.drain(&|| false).unwrap();
            store.write_all(&names.local(0), &jobs(&["bad2"])).unwrap();
            worker.drain(&|| false).unwrap();
        }

        // A restarted worker keeps the earlier entries.
        let mut worker = LocalWorker::new(0, &names, &store, &executor);
        store.write_all(&names.local(0), &jobs(&["bad3"])).unwrap();
        worker.drain(&|| false).unwrap();

        assert_eq!(
            store.read_all(&names.failed(0)).unwrap(),
            jobs(&["bad1", "bad2", "bad3"])
        );
    }

    /// File store that refuses to write failure logs.
    struct NoFailureLog(FileQueueStore);

    impl QueueStore for NoFailureLog {
        fn exists(&self, name: &Path) -> bool {
            self.0.exists(name)
        }

        fn read_all(&self, name: &Path) -> QueueResult<Vec<Job>> {
            self.0.read_all(name)
        }

        fn write_all(&self, name: &Path, jobs: &[Job]) -> QueueResult<()> {
            if name.to_string_lossy().ends_with(".failed") {
                return Err(QueueError::Io {
                    path: name.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.0.write_all(name, jobs)
        }
    }

    #[test]
    fn test_failed_job_leaves_queue_even_if_failure_log_unwritable() {
        let temp = TempDir::new().unwrap();
        let store = NoFailureLog(FileQueueStore::new());
        let names = QueueNames::new(temp.path().join("q"));
        store.write_all(&names.local(0), &jobs(&["a", "b"])).unwrap();

        let executor = ScriptedExecutor::new(&["a", "b"]);
        let mut worker = LocalWorker::new(0, &names, &store, &executor);
        let err = worker.drain(&|| false).unwrap_err();

        assert!(matches!(err, WorkerError::Queue { rank: 0, .. }));
        assert_eq!(executor.calls(), vec!["b"]);
        assert_eq!(store.read_all(&names.local(0)).unwrap(), jobs(&["a"]));
    }

    #[test]
    fn test_stop_leaves_remaining_jobs_persisted() {
        let temp = TempDir::new().unwrap();
        let store = FileQueueStore::new();
        let names = QueueNames::new(temp.path().join("q"));
        store.write_all(&names.local(2), &jobs(&["a", "b", "c", "d"])).unwrap();

        let executor = ScriptedExecutor::new(&[]);
        let mut worker = LocalWorker::new(2, &names, &store, &executor);
        let report = worker.drain(&|| true).unwrap();

        assert!(report.interrupted);
        assert_eq!(report.executed, 1);
        assert_eq!(executor.calls(), vec!["d"]);
        assert_eq!(store.read_all(&names.local(2)).unwrap(), jobs(&["a", "b", "c"]));
        assert!(worker.has_work().unwrap());
    }

    #[test]
    fn test_stop_after_last_job_is_not_an_interruption() {
        let temp = TempDir::new().unwrap();
        let store = FileQueueStore::new();
        let names = QueueNames::new(temp.path().join("q"));
        store.write_all(&names.local(0), &jobs(&["only"])).unwrap();

        let executor = ScriptedExecutor::new(&[]);
        let mut worker = LocalWorker::new(0, &names, &store, &executor);
        let report = worker.drain(&|| true).unwrap();

        assert!(!report.interrupted);
        assert_eq!(report.executed, 1);
    }
}
