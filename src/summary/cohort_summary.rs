//! Cohort summary (`<base>.summary.json`)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::worker_summary::WorkerSummary;
use crate::coordinator::StopReason;

/// Schema version for the cohort summary
pub const COHORT_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for the cohort summary
pub const COHORT_SUMMARY_SCHEMA_ID: &str = "taskcrunch/cohort_summary@1";

/// Errors reading or writing a summary
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("I/O error on summary {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Aggregate of one cohort run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier (lowercase ULID)
    pub run_id: String,

    /// Global queue the cohort served
    pub queue: PathBuf,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    /// Cohort size
    pub workers: usize,

    /// Why the cohort stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    pub jobs_executed: usize,

    pub jobs_succeeded: usize,

    pub jobs_failed: usize,

    /// Distribution rounds performed by the coordinator
    pub distributions: usize,

    /// Coordination rounds completed by the cohort
    pub coordination_rounds: usize,

    pub storage_errors: usize,

    /// Per-worker detail, in rank order
    pub per_worker: Vec<WorkerSummary>,

    /// Human-readable summary
    pub human_summary: String,
}

impl CohortSummary {
    /// Fold worker summaries into one. Missing ranks are simply absent.
    pub fn from_workers(
        run_id: String,
        queue: &Path,
        started_at: DateTime<Utc>,
        mut per_worker: Vec<WorkerSummary>,
    ) -> Self {
        per_worker.sort_by_key(|w| w.rank);
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        let jobs_executed = per_worker.iter().map(|w| w.executed).sum();
        let jobs_succeeded = per_worker.iter().map(|w| w.succeeded).sum();
        let jobs_failed = per_worker.iter().map(|w| w.failed).sum();
        let distributions = per_worker.iter().map(|w| w.distributions).sum();
        let storage_errors = per_worker.iter().map(|w| w.storage_errors).sum();
        // Every member takes part in every round; rank 0 speaks for all.
        let coordination_rounds = per_worker
            .iter()
            .map(|w| w.coordination_rounds)
            .max()
            .unwrap_or(0);
        let stop_reason = per_worker.iter().find_map(|w| w.stop_reason);

        let human_summary = Self::generate_human_summary(
            jobs_executed,
            jobs_failed,
            per_worker.len(),
            stop_reason,
        );

        Self {
            schema_version: COHORT_SUMMARY_SCHEMA_VERSION,
            schema_id: COHORT_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            queue: queue.to_path_buf(),
            started_at,
            finished_at,
            duration_ms,
            workers: per_worker.len(),
            stop_reason,
            jobs_executed,
            jobs_succeeded,
            jobs_failed,
            distributions,
            coordination_rounds,
            storage_errors,
            per_worker,
            human_summary,
        }
    }

    fn generate_human_summary(
        executed: usize,
        failed: usize,
        workers: usize,
        stop_reason: Option<StopReason>,
    ) -> String {
        let reason = stop_reason
            .map(|r| format!(", {}", r))
            .unwrap_or_default();
        if executed == 0 {
            format!("No jobs executed on {} worker(s){}", workers, reason)
        } else {
            format!(
                "{} job(s) executed on {} worker(s), {} failed{}",
                executed, workers, failed, reason
            )
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), SummaryError> {
        let json = self.to_json()?;
        let io_error = |source| SummaryError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        fs::write(&temp_path, json).map_err(io_error)?;
        fs::rename(&temp_path, path).map_err(io_error)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, SummaryError> {
        let json = fs::read_to_string(path).map_err(|source| SummaryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(&json)?)
    }
}
