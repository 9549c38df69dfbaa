//! Jobs and the executor seam
//!
//! A job is an opaque command string. The cohort never looks inside it; an
//! executor runs it and reports whether it succeeded.

mod shell;

pub use shell::{ShellExecutor, DEFAULT_SHELL};

use std::fmt;

use serde::{Deserialize, Serialize};

/// One unit of work: a command line handed to the executor verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job(String);

impl Job {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Job {
    fn from(command: String) -> Self {
        Self(command)
    }
}

impl From<&str> for Job {
    fn from(command: &str) -> Self {
        Self(command.to_string())
    }
}

/// How a job execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The command exited with status zero
    Success,
    /// Nonzero exit, killed by a signal, or never started
    Failure {
        /// Exit code when the process exited normally
        exit_code: Option<i32>,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

/// Runs one job to completion. Implementations block the calling worker.
pub trait JobExecutor: Send + Sync {
    fn run(&self, job: &Job) -> JobOutcome;
}
