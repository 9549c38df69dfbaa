//! taskcrunch - filesystem job cruncher for a fixed cohort of workers
//!
//! A global queue file holds one shell job per line. Worker 0 periodically
//! moves its contents into per-worker local queues; every worker drains its
//! own queue, persisting the remainder after each job and logging failures.
//! When nobody has work the cohort meets at a barrier, rank 0 decides, and
//! the idle counter it broadcasts tells every worker whether to keep polling
//! or stop.

pub mod cohort;
pub mod config;
pub mod coordinator;
pub mod distributor;
pub mod idle;
pub mod job;
pub mod queue;
pub mod signal;
pub mod summary;
pub mod worker;

pub use cohort::{Cohort, CohortError};
pub use config::{ConfigError, CruncherConfig, LoadedConfig};
pub use coordinator::{run_member, Coordinator, Decision, MemberContext, StopReason};
pub use distributor::{chunk_size, plan_chunks, DistributeError, Distribution, Distributor};
pub use idle::{DistributionEpoch, IdleTracker};
pub use job::{Job, JobExecutor, JobOutcome, ShellExecutor};
pub use queue::{FileQueueStore, QueueError, QueueLock, QueueNames, QueueStore};
pub use signal::{SignalHandler, SignalState, EXIT_CODE_CANCELLED};
pub use summary::{CohortSummary, SummaryError, WorkerSummary};
pub use worker::{DrainReport, LocalWorker, WorkerError};
