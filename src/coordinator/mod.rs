//! Coordinator decision step (rank 0)
//!
//! After every worker has reached the barrier, rank 0 alone inspects the
//! shared state and decides what the round means. The resulting idle counter
//! is what gets broadcast. Rules, first match wins:
//!
//! | condition                                  | effect                        |
//! |--------------------------------------------|-------------------------------|
//! | stop requested or `<base>.terminate` found  | saturate counter, terminate   |
//! | some local queue still holds jobs           | reset counter                 |
//! | epoch `Exhausted`                           | epoch to `Ready`              |
//! | epoch `Ready`, global queue non-empty       | distribute, reset, `Exhausted`|
//! | otherwise                                   | advance counter               |
//!
//! Storage and lock errors never abort the cohort; the round counts as idle.

mod protocol;

pub use protocol::{run_member, MemberContext};

use std::fmt;
use std::fs;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::distributor::{DistributeError, Distribution, Distributor};
use crate::idle::{DistributionEpoch, IdleTracker};
use crate::queue::{LockError, QueueError, QueueLock, QueueNames, QueueStore};

/// Errors inside one decision step. Logged by the coordinator, never returned.
#[derive(Debug, Error)]
enum RoundError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Distribute(#[from] DistributeError),
}

/// Why the cohort stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The idle counter reached its limit
    IdleLimit,
    /// `<base>.terminate` was found
    TerminateFile,
    /// SIGINT/SIGTERM or an embedding program asked to stop
    Signal,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::IdleLimit => write!(f, "idle limit reached"),
            StopReason::TerminateFile => write!(f, "terminate file found"),
            StopReason::Signal => write!(f, "stop requested"),
        }
    }
}

/// Outcome of one coordination round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A batch moved from the global queue into local queues
    Distributed(Distribution),
    /// Work is still sitting in local queues, nothing was distributed
    LocalWorkPending,
    /// The previous batch is done, the next global batch may go out
    EpochReset,
    /// Nothing to do anywhere
    Idle,
    /// The cohort stops after this round
    Terminate(StopReason),
}

/// Rank 0's private state across rounds.
pub struct Coordinator<'a> {
    names: &'a QueueNames,
    store: &'a dyn QueueStore,
    workers: usize,
    lock_timeout: Duration,
    tracker: IdleTracker,
    epoch: DistributionEpoch,
    distributor: Distributor,
    stop_reason: Option<StopReason>,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        names: &'a QueueNames,
        store: &'a dyn QueueStore,
        workers: usize,
        max_idle_steps: u64,
        lock_timeout: Duration,
        distributor: Distributor,
    ) -> Self {
        Self {
            names,
            store,
            workers,
            lock_timeout,
            tracker: IdleTracker::new(max_idle_steps),
            epoch: DistributionEpoch::default(),
            distributor,
            stop_reason: None,
        }
    }

    /// Authoritative idle counter, the value to broadcast.
    pub fn steps(&self) -> u64 {
        self.tracker.steps()
    }

    pub fn epoch(&self) -> DistributionEpoch {
        self.epoch
    }

    /// Set once the coordinator has decided to stop.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Run the decision step for one round.
    pub fn decide(&mut self, stop_requested: bool) -> Decision {
        if let Some(reason) = self.stop_request(stop_requested) {
            info!(%reason, "stopping cohort");
            self.tracker.saturate();
            self.stop_reason = Some(reason);
            return Decision::Terminate(reason);
        }

        match self.pending_local_work() {
            Ok(true) => {
                debug!("local queues still hold jobs, skipping distribution");
                self.tracker.reset();
                return Decision::LocalWorkPending;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "cannot inspect local queues, counting round as idle");
                return self.idle();
            }
        }

        if self.epoch == DistributionEpoch::Exhausted {
            debug!("batch finished, ready for new jobs");
            self.epoch = DistributionEpoch::Ready;
            return Decision::EpochReset;
        }

        match self.try_distribute() {
            Ok(distribution) if !distribution.is_empty() => {
                info!(
                    jobs = distribution.total,
                    workers = distribution.workers_fed(),
                    "distributed jobs from global queue"
                );
                self.tracker.reset();
                self.epoch = DistributionEpoch::Exhausted;
                Decision::Distributed(distribution)
            }
            Ok(_) => self.idle(),
            Err(e) => {
                warn!(error = %e, "distribution failed, counting round as idle");
                self.idle()
            }
        }
    }

    fn idle(&mut self) -> Decision {
        self.tracker.advance();
        if self.tracker.is_exhausted() {
            self.stop_reason = Some(StopReason::IdleLimit);
        }
        Decision::Idle
    }

    fn stop_request(&self, stop_requested: bool) -> Option<StopReason> {
        if stop_requested {
            return Some(StopReason::Signal);
        }

        let terminate = self.names.terminate();
        if !terminate.exists() {
            return None;
        }

        match fs::remove_file(&terminate) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %terminate.display(), error = %e, "cannot remove terminate file"),
        }
        Some(StopReason::TerminateFile)
    }

    fn pending_local_work(&self) -> Result<bool, QueueError> {
        for rank in 0..self.workers {
            if !self.store.is_empty(&self.names.local(rank))? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn try_distribute(&mut self) -> Result<Distribution, RoundError> {
        // Unlocked peek: idle rounds never take the lock.
        if self.store.is_empty(self.names.global())? {
            return Ok(Distribution::default());
        }

        let _lock = QueueLock::acquire(&self.names.lock(), self.lock_timeout)?;
        Ok(self
            .distributor
            .distribute(self.store, self.names, self.workers)?)
    }
}
