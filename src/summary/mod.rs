//! Run summaries
//!
//! Every worker reports a [`WorkerSummary`] when it leaves the protocol loop;
//! the cohort folds them into one [`CohortSummary`] written next to the
//! queue as `<base>.summary.json`.

mod cohort_summary;
mod worker_summary;

pub use cohort_summary::{
    CohortSummary, SummaryError, COHORT_SUMMARY_SCHEMA_ID, COHORT_SUMMARY_SCHEMA_VERSION,
};
pub use worker_summary::WorkerSummary;
