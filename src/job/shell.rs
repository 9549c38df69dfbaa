//! Shell-backed job executor.

use std::process::Command;

use tracing::warn;

use super::{Job, JobExecutor, JobOutcome};

/// Default interpreter used for `<shell> -c <job>`.
pub const DEFAULT_SHELL: &str = "sh";

/// Runs each job as `<shell> -c <job>` with inherited stdio.
///
/// No sandbox and no timeout: a job that never exits blocks its worker.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl JobExecutor for ShellExecutor {
    fn run(&self, job: &Job) -> JobOutcome {
        match Command::new(&self.shell).arg("-c").arg(job.as_str()).status() {
            Ok(status) if status.success() => JobOutcome::Success,
            Ok(status) => JobOutcome::Failure {
                exit_code: status.code(),
            },
            Err(e) => {
                warn!(shell = %self.shell, job = %job, error = %e, "failed to start job");
                JobOutcome::Failure { exit_code: None }
            }
        }
    }
}
