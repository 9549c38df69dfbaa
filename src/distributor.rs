//! Partitioning the global queue into per-worker local queues
//!
//! Distribution moves jobs: the global queue is read, shuffled, cut into at
//! most N contiguous chunks of `max(1, ceil(total / N))` jobs, each chunk is
//! written as one worker's local queue and the global queue is cleared.
//! Workers past the last chunk receive nothing that round. If a local
//! write fails, the chunks already written stay put and the global queue
//! keeps only the jobs that were not placed.

use std::ops::Range;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::queue::{QueueError, QueueNames, QueueStore};

/// Errors from distribution.
#[derive(Debug, Error)]
pub enum DistributeError {
    #[error("cannot distribute to zero workers")]
    NoWorkers,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Jobs per chunk for `total` jobs over `workers` workers.
///
/// # Panics
///
/// Panics if `workers` is zero.
pub fn chunk_size(total: usize, workers: usize) -> usize {
    assert!(workers > 0, "chunk_size needs at least one worker");
    total.div_ceil(workers).max(1)
}

/// Index range of each worker's chunk, in rank order.
///
/// Planning stops at the first worker whose chunk would be empty, so the
/// result has at most `workers` entries and may have fewer.
pub fn plan_chunks(total: usize, workers: usize) -> Vec<Range<usize>> {
    if workers == 0 {
        return Vec::new();
    }

    let size = chunk_size(total, workers);
    let mut chunks = Vec::new();

    for worker in 0..workers {
        let start = worker * size;
        let end = total.min((worker + 1) * size);
        if start >= end || start >= total {
            break;
        }
        chunks.push(start..end);
    }

    chunks
}

/// Outcome of one distribution round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    /// Jobs taken from the global queue
    pub total: usize,
    /// Jobs written to each rank's local queue, in rank order
    pub per_worker: Vec<usize>,
}

impl Distribution {
    /// Ranks that received work.
    pub fn workers_fed(&self) -> usize {
        self.per_worker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Moves jobs from the global queue into local queues.
#[derive(Debug)]
pub struct Distributor {
    rng: StdRng,
}

impl Distributor {
    /// Shuffle with fresh OS entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Shuffle deterministically.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run one distribution round over `workers` local queues.
    ///
    /// The caller must be the only writer of the global queue and of every
    /// local queue for the duration of the call.
    pub fn distribute(
        &mut self,
        store: &dyn QueueStore,
        names: &QueueNames,
        workers: usize,
    ) -> Result<Distribution, DistributeError> {
        if workers == 0 {
            return Err(DistributeError::NoWorkers);
        }

        let mut jobs = store.read_all(names.global())?;
        if jobs.is_empty() {
            return Ok(Distribution::default());
        }

        jobs.shuffle(&mut self.rng);

        let chunks = plan_chunks(jobs.len(), workers);
        let mut per_worker = Vec::with_capacity(chunks.len());
        for (rank, range) in chunks.into_iter().enumerate() {
            debug!(rank, jobs = range.len(), "writing local queue");
            if let Err(e) = store.write_all(&names.local(rank), &jobs[range.clone()]) {
                // Chunks before this rank are already placed; only the rest stays global.
                let unplaced = &jobs[range.start..];
                if let Err(restore) = store.write_all(names.global(), unplaced) {
                    warn!(
                        error = %restore,
                        placed = range.start,
                        "cannot shrink global queue after partial distribution"
                    );
                }
                return Err(e.into());
            }
            per_worker.push(range.len());
        }

        store.write_all(names.global(), &[])?;

        Ok(Distribution {
            total: jobs.len(),
            per_worker,
        })
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}
