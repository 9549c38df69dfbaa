//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

use crate::idle::{DEFAULT_MAX_IDLE_STEPS, DEFAULT_SLEEP_MS};
use crate::job::DEFAULT_SHELL;

/// Default wait for the global queue lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Cohort size (default: available parallelism)
    pub workers: usize,

    /// Idle rounds before the cohort stops (default: 100)
    pub max_idle_steps: u64,

    /// Sleep per idle round in milliseconds (default: 3000)
    pub sleep_ms: u64,

    /// Global queue lock timeout in milliseconds (default: 10000)
    pub lock_timeout_ms: u64,

    /// Interpreter for `<shell> -c <job>` (default: "sh")
    pub shell: String,

    /// Write `<queue>.summary.json` on exit (default: true)
    pub summary: bool,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_idle_steps: DEFAULT_MAX_IDLE_STEPS,
            sleep_ms: DEFAULT_SLEEP_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            shell: DEFAULT_SHELL.to_string(),
            summary: true,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "workers": self.workers,
            "max_idle_steps": self.max_idle_steps,
            "sleep_ms": self.sleep_ms,
            "lock_timeout_ms": self.lock_timeout_ms,
            "shell": self.shell,
            "summary": self.summary,
        })
    }
}
