//! Layered configuration
//!
//! Values are resolved from three layers, later layers winning:
//! 1. Built-in defaults
//! 2. TOML config file (`--config`, or `<queue>.toml` next to the queue)
//! 3. CLI flags

mod defaults;
mod merge;

pub use defaults::{BuiltinDefaults, DEFAULT_LOCK_TIMEOUT_MS};
pub use merge::{deep_merge, merge_layers};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer with provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Resolved cohort configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CruncherConfig {
    /// Number of workers in the cohort
    pub workers: usize,

    /// Consecutive idle rounds before every worker exits
    pub max_idle_steps: u64,

    /// Sleep per idle round in milliseconds
    pub sleep_ms: u64,

    /// How long the coordinator waits for the global queue lock
    pub lock_timeout_ms: u64,

    /// Interpreter used to run jobs
    pub shell: String,

    /// Fixed shuffle seed for reproducible distribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Write a run summary when the cohort stops
    pub summary: bool,
}

impl Default for CruncherConfig {
    fn default() -> Self {
        let defaults = BuiltinDefaults::default();
        Self {
            workers: defaults.workers,
            max_idle_steps: defaults.max_idle_steps,
            sleep_ms: defaults.sleep_ms,
            lock_timeout_ms: defaults.lock_timeout_ms,
            shell: defaults.shell,
            seed: None,
            summary: defaults.summary,
        }
    }
}

/// Configuration plus the layers it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: CruncherConfig,
    pub sources: Vec<ConfigSource>,
}

impl CruncherConfig {
    /// Resolve the configuration from all layers.
    ///
    /// `file` is skipped when it does not exist; `cli` holds only the flags
    /// the user actually passed.
    pub fn load(file: Option<&Path>, cli: Option<Value>) -> Result<LoadedConfig, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
        }];

        if let Some(path) = file.filter(|p| p.exists()) {
            layers.push(load_toml_file(path)?);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_path_buf()),
            });
        }

        if let Some(cli) = cli {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
            });
        }

        let config = Self::from_value(merge_layers(layers))?;
        Ok(LoadedConfig { config, sources })
    }

    /// Build from an already merged value and validate it.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.max_idle_steps == 0 {
            return Err(ConfigError::Invalid(
                "max_idle_steps must be at least 1".to_string(),
            ));
        }
        if self.shell.trim().is_empty() {
            return Err(ConfigError::Invalid("shell must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Load and parse a TOML file as a JSON value
fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(toml_to_json(toml_value))
}

/// Convert TOML Value to JSON Value
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}
