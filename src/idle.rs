//! Idle cycle counting and termination
//!
//! The coordinator owns the authoritative idle counter. After every
//! coordination round its value is broadcast and each worker adopts it with
//! [`IdleTracker::observe`], so every worker evaluates the same termination
//! condition on the same number.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of consecutive idle rounds before the cohort stops.
pub const DEFAULT_MAX_IDLE_STEPS: u64 = 100;

/// Default sleep between idle rounds.
pub const DEFAULT_SLEEP_MS: u64 = 3000;

/// Consecutive idle rounds, bounded by `max_idle_steps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTracker {
    steps: u64,
    max_idle_steps: u64,
}

impl IdleTracker {
    pub fn new(max_idle_steps: u64) -> Self {
        Self {
            steps: 0,
            max_idle_steps,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Work was seen: start counting from zero again.
    pub fn reset(&mut self) {
        self.steps = 0;
    }

    /// Count one more idle round.
    pub fn advance(&mut self) {
        self.steps = self.steps.saturating_add(1).min(self.max_idle_steps);
    }

    /// Jump straight to the limit so every worker stops after the next broadcast.
    pub fn saturate(&mut self) {
        self.steps = self.max_idle_steps;
    }

    /// Adopt the coordinator's broadcast value.
    pub fn observe(&mut self, steps: u64) {
        self.steps = steps;
    }

    /// True once the idle limit is reached.
    pub fn is_exhausted(&self) -> bool {
        self.steps >= self.max_idle_steps
    }

    /// Time left before the cohort terminates if nothing changes.
    pub fn remaining(&self, sleep: Duration) -> Duration {
        let rounds = self.max_idle_steps.saturating_sub(self.steps);
        sleep.saturating_mul(u32::try_from(rounds).unwrap_or(u32::MAX))
    }
}

/// Coordinator-local distribution epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionEpoch {
    /// The next non-empty global queue may be distributed
    #[default]
    Ready,
    /// A batch went out; the following idle round closes it
    Exhausted,
}
