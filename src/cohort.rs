//! Cohort runner
//!
//! Starts one thread per rank inside this process, gives each a member of a
//! fresh [`ThreadGroup`], and folds their summaries once all have left.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use crunch_group::{Collective, GroupError, GroupMember, ThreadGroup};
use thiserror::Error;
use tracing::{error, info};

use crate::config::CruncherConfig;
use crate::coordinator::{run_member, MemberContext};
use crate::job::{JobExecutor, ShellExecutor};
use crate::queue::{FileQueueStore, QueueError, QueueNames, QueueStore};
use crate::signal::SignalState;
use crate::summary::{CohortSummary, WorkerSummary};

/// Errors that stop a cohort from running to completion.
#[derive(Debug, Error)]
pub enum CohortError {
    #[error("cannot prepare queues: {0}")]
    Queue(#[from] QueueError),

    #[error("process group: {0}")]
    Group(#[from] GroupError),

    #[error("cannot spawn worker thread {rank}: {source}")]
    Spawn {
        rank: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker {rank} panicked")]
    WorkerPanicked { rank: usize },
}

/// A fixed set of workers serving one global queue.
pub struct Cohort {
    names: QueueNames,
    config: CruncherConfig,
    store: Box<dyn QueueStore>,
    executor: Box<dyn JobExecutor>,
    signals: Arc<SignalState>,
}

impl Cohort {
    /// Cohort over `queue` with file-backed queues and the configured shell.
    pub fn new(queue: &Path, config: CruncherConfig) -> Self {
        let executor = ShellExecutor::new(config.shell.clone());
        Self {
            names: QueueNames::new(queue),
            config,
            store: Box::new(FileQueueStore::new()),
            executor: Box::new(executor),
            signals: Arc::new(SignalState::new()),
        }
    }

    /// Replace the job executor.
    pub fn with_executor(mut self, executor: impl JobExecutor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    /// Replace the queue store.
    pub fn with_store(mut self, store: impl QueueStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Share a stop flag, usually the one the signal handler sets.
    pub fn with_signals(mut self, signals: Arc<SignalState>) -> Self {
        self.signals = signals;
        self
    }

    pub fn names(&self) -> &QueueNames {
        &self.names
    }

    pub fn config(&self) -> &CruncherConfig {
        &self.config
    }

    pub fn signals(&self) -> Arc<SignalState> {
        Arc::clone(&self.signals)
    }

    /// Run every worker until the cohort stops and return the summary.
    pub fn run(&self) -> Result<CohortSummary, CohortError> {
        let run_id = ulid::Ulid::new().to_string().to_lowercase();
        let started_at = Utc::now();
        let workers = self.config.workers;

        self.store.ensure_exists(self.names.global())?;
        for rank in 0..workers {
            self.store.ensure_exists(&self.names.local(rank))?;
        }

        let members = ThreadGroup::new(workers)?;
        info!(
            run_id = %run_id,
            workers,
            queue = %self.names.global().display(),
            max_idle_steps = self.config.max_idle_steps,
            sleep_ms = self.config.sleep_ms,
            "starting cohort"
        );

        let ctx = MemberContext {
            names: &self.names,
            store: self.store.as_ref(),
            executor: self.executor.as_ref(),
            config: &self.config,
            signals: self.signals.as_ref(),
        };

        let results = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for member in members {
                let rank = member.rank();
                let handle = thread::Builder::new()
                    .name(format!("crunch-{}", rank))
                    .spawn_scoped(scope, move || run_to_end(member, &ctx))
                    .map_err(|source| CohortError::Spawn { rank, source })?;
                handles.push((rank, handle));
            }

            // Join every handle; a panic surfaces as WorkerPanicked.
            let mut results = Vec::with_capacity(handles.len());
            for (rank, handle) in handles {
                results.push(match handle.join() {
                    Ok(result) => result,
                    Err(_) => {
                        error!(rank, "worker thread panicked");
                        Err(CohortError::WorkerPanicked { rank })
                    }
                });
            }
            Ok::<_, CohortError>(results)
        })?;

        let mut summaries = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(summary) => summaries.push(summary),
                // A panic is the root cause; the peers' Abandoned errors follow from it.
                Err(e @ CohortError::WorkerPanicked { .. }) => {
                    first_error = Some(e);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let summary = CohortSummary::from_workers(run_id, self.names.global(), started_at, summaries);
        info!(
            run_id = %summary.run_id,
            executed = summary.jobs_executed,
            failed = summary.jobs_failed,
            duration_ms = summary.duration_ms,
            "cohort finished: {}",
            summary.human_summary
        );
        Ok(summary)
    }
}

/// Run one member and release its group handle: cleanly on success,
/// abandoning the group on error so blocked peers wake up.
fn run_to_end(member: GroupMember, ctx: &MemberContext<'_>) -> Result<WorkerSummary, CohortError> {
    match run_member(&member, ctx) {
        Ok(summary) => {
            member.leave();
            Ok(summary)
        }
        Err(e) => {
            member.abandon();
            Err(e.into())
        }
    }
}
