//! Per-worker protocol loop
//!
//! Each worker alternates between two states:
//!
//! - Executing: the local queue has jobs, drain it without talking to peers
//! - Synchronizing: the local queue is empty, so meet every peer at the
//!   barrier, let rank 0 decide, and adopt the broadcast idle counter
//!
//! The loop ends when the broadcast counter reaches `max_idle_steps`. All
//! members see the same value after every round, so they leave together.

use std::thread;

use crunch_group::{Collective, GroupResult};
use tracing::{debug, info, warn};

use super::{Coordinator, Decision};
use crate::config::CruncherConfig;
use crate::distributor::Distributor;
use crate::idle::IdleTracker;
use crate::job::JobExecutor;
use crate::queue::{QueueNames, QueueStore};
use crate::signal::SignalState;
use crate::summary::WorkerSummary;
use crate::worker::LocalWorker;

/// Everything a member needs besides its group handle.
#[derive(Clone, Copy)]
pub struct MemberContext<'a> {
    pub names: &'a QueueNames,
    pub store: &'a dyn QueueStore,
    pub executor: &'a dyn JobExecutor,
    pub config: &'a CruncherConfig,
    pub signals: &'a SignalState,
}

impl MemberContext<'_> {
    fn distributor(&self) -> Distributor {
        match self.config.seed {
            Some(seed) => Distributor::with_seed(seed),
            None => Distributor::new(),
        }
    }
}

/// Run one member until the cohort stops.
///
/// Job failures and storage errors are absorbed; only a broken group ends
/// the loop with an error.
pub fn run_member<C: Collective>(group: &C, ctx: &MemberContext<'_>) -> GroupResult<WorkerSummary> {
    let rank = group.rank();
    let sleep = ctx.config.sleep();
    let stop = || ctx.signals.is_stop_requested();

    let mut worker = LocalWorker::new(rank, ctx.names, ctx.store, ctx.executor);
    let mut coordinator = (rank == 0).then(|| {
        Coordinator::new(
            ctx.names,
            ctx.store,
            group.size(),
            ctx.config.max_idle_steps,
            ctx.config.lock_timeout(),
            ctx.distributor(),
        )
    });
    let mut tracker = IdleTracker::new(ctx.config.max_idle_steps);
    let mut summary = WorkerSummary::new(rank);

    info!(rank, queue = %worker.queue().display(), "worker started");

    while !tracker.is_exhausted() {
        if !stop() {
            match worker.has_work() {
                Ok(true) => {
                    tracker.reset();
                    match worker.drain(&stop) {
                        Ok(report) => {
                            summary.record_drain(&report);
                            if !report.interrupted {
                                continue;
                            }
                        }
                        Err(e) => {
                            warn!(rank, error = %e, "draining local queue failed");
                            summary.storage_errors += 1;
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(rank, error = %e, "cannot read local queue");
                    summary.storage_errors += 1;
                }
            }
        }

        group.barrier()?;

        let proposal = match coordinator.as_mut() {
            Some(coordinator) => {
                let decision = coordinator.decide(stop());
                debug!(rank, ?decision, steps = coordinator.steps(), "coordination round");
                if matches!(decision, Decision::Distributed(_)) {
                    summary.distributions += 1;
                }
                coordinator.steps()
            }
            None => 0,
        };

        let steps = group.broadcast(proposal, 0)?;
        tracker.observe(steps);
        summary.coordination_rounds += 1;

        if steps > 0 && !tracker.is_exhausted() {
            info!(
                rank,
                "No jobs found in file '{}'. Task terminates in {}ms.",
                worker.queue().display(),
                tracker.remaining(sleep).as_millis()
            );
            thread::sleep(sleep);
        }
    }

    summary.stop_reason = coordinator.as_ref().and_then(|c| c.stop_reason());
    info!(rank, executed = summary.executed, failed = summary.failed, "worker finished");
    Ok(summary)
}
