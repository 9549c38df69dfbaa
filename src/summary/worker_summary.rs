//! Per-worker counters

use serde::{Deserialize, Serialize};

use crate::coordinator::StopReason;
use crate::worker::DrainReport;

/// What one worker did during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    /// Rank of the worker
    pub rank: usize,

    /// Jobs handed to the executor
    pub executed: usize,

    /// Jobs that exited zero
    pub succeeded: usize,

    /// Jobs written to the failure log
    pub failed: usize,

    /// Barrier/broadcast rounds taken part in
    pub coordination_rounds: usize,

    /// Distribution rounds performed (rank 0 only)
    pub distributions: usize,

    /// Queue reads or writes that failed and were skipped
    pub storage_errors: usize,

    /// Reason the cohort stopped, as decided by rank 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl WorkerSummary {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            ..Self::default()
        }
    }

    /// Add the counters of one drain.
    pub fn record_drain(&mut self, report: &DrainReport) {
        self.executed += report.executed;
        self.succeeded += report.succeeded;
        self.failed += report.failed;
    }
}
