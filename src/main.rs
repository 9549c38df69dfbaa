//! taskcrunch CLI
//!
//! Entry point for the `taskcrunch` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use serde_json::{Map, Value};
use taskcrunch::{
    Cohort, CruncherConfig, Job, QueueLock, QueueNames, QueueStore, FileQueueStore, SignalHandler,
    EXIT_CODE_CANCELLED,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors (config, storage, worker panic)
const EXIT_CODE_ERROR: i32 = 1;

/// Exit code for command-line usage errors
const EXIT_CODE_USAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "taskcrunch")]
#[command(about = "Distribute shell jobs from a queue file across a cohort of workers", version)]
struct Cli {
    /// Global queue file, one job per line. Local queues live next to it
    /// as <QUEUE_FILE>.<rank>
    queue_file: PathBuf,

    /// Number of workers (default: available parallelism)
    #[arg(long, short = 'n')]
    workers: Option<usize>,

    /// Idle rounds before the cohort stops (default: 100)
    #[arg(long)]
    max_idle_steps: Option<u64>,

    /// Sleep per idle round in milliseconds (default: 3000)
    #[arg(long)]
    sleep_ms: Option<u64>,

    /// How long to wait for the global queue lock in milliseconds
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Interpreter used as `<SHELL> -c <job>` (default: sh)
    #[arg(long)]
    shell: Option<String>,

    /// Config file (default: <QUEUE_FILE>.toml if present)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Fixed shuffle seed for reproducible distribution
    #[arg(long)]
    seed: Option<u64>,

    /// Do not write <QUEUE_FILE>.summary.json
    #[arg(long)]
    no_summary: bool,

    /// Log filter, overrides RUST_LOG (e.g. "debug", "taskcrunch=trace")
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Append a job to the global queue and exit (repeatable)
    #[arg(long, value_name = "JOB")]
    submit: Vec<String>,
}

impl Cli {
    /// Config layer holding only the flags actually passed
    fn config_layer(&self) -> Option<Value> {
        let mut layer = Map::new();
        if let Some(workers) = self.workers {
            layer.insert("workers".into(), workers.into());
        }
        if let Some(steps) = self.max_idle_steps {
            layer.insert("max_idle_steps".into(), steps.into());
        }
        if let Some(sleep_ms) = self.sleep_ms {
            layer.insert("sleep_ms".into(), sleep_ms.into());
        }
        if let Some(timeout) = self.lock_timeout_ms {
            layer.insert("lock_timeout_ms".into(), timeout.into());
        }
        if let Some(shell) = &self.shell {
            layer.insert("shell".into(), shell.clone().into());
        }
        if let Some(seed) = self.seed {
            layer.insert("seed".into(), seed.into());
        }
        if self.no_summary {
            layer.insert("summary".into(), false.into());
        }

        if layer.is_empty() {
            None
        } else {
            Some(Value::Object(layer))
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = e.print();
                process::exit(0);
            }
            // Wrong positional count: fail without output.
            ErrorKind::MissingRequiredArgument
            | ErrorKind::UnknownArgument
            | ErrorKind::TooManyValues
            | ErrorKind::WrongNumberOfValues => process::exit(EXIT_CODE_USAGE),
            _ => {
                let _ = e.print();
                process::exit(EXIT_CODE_USAGE);
            }
        },
    };

    init_logging(cli.log_level.as_deref());

    let names = QueueNames::new(&cli.queue_file);
    let config = load_config(&cli, &names);

    if cli.submit.is_empty() {
        run_cohort(&cli, config);
    } else {
        run_submit(&names, &config, &cli.submit);
    }
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("Invalid log filter '{}': {}", directives, e);
                process::exit(EXIT_CODE_USAGE);
            }
        },
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

fn load_config(cli: &Cli, names: &QueueNames) -> CruncherConfig {
    if let Some(path) = &cli.config {
        if !path.exists() {
            eprintln!("Config file not found: {}", path.display());
            process::exit(EXIT_CODE_ERROR);
        }
    }
    let path = cli.config.clone().unwrap_or_else(|| names.config());

    match CruncherConfig::load(Some(&path), cli.config_layer()) {
        Ok(loaded) => {
            for source in &loaded.sources {
                match &source.path {
                    Some(path) => info!(origin = ?source.origin, path = %path.display(), "config layer"),
                    None => tracing::debug!(origin = ?source.origin, "config layer"),
                }
            }
            loaded.config
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(EXIT_CODE_ERROR);
        }
    }
}

fn run_submit(names: &QueueNames, config: &CruncherConfig, submit: &[String]) {
    let jobs: Vec<Job> = submit
        .iter()
        .filter(|job| {
            let blank = job.trim().is_empty();
            if blank {
                warn!("ignoring blank job");
            }
            !blank
        })
        .map(|job| Job::from(job.as_str()))
        .collect();

    let _lock = match QueueLock::acquire(&names.lock(), config.lock_timeout()) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_CODE_ERROR);
        }
    };

    if let Err(e) = FileQueueStore::new().append(names.global(), &jobs) {
        eprintln!("Error: {}", e);
        process::exit(EXIT_CODE_ERROR);
    }

    info!(
        jobs = jobs.len(),
        queue = %names.global().display(),
        "submitted jobs"
    );
}

fn run_cohort(cli: &Cli, config: CruncherConfig) {
    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        warn!(error = %e, "cannot install signal handler, interrupts will kill the cohort");
    }
    let signals = handler.state();
    let write_summary = config.summary;

    let cohort = Cohort::new(&cli.queue_file, config).with_signals(signals.clone());
    let summary = match cohort.run() {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_CODE_ERROR);
        }
    };

    if write_summary {
        let path = cohort.names().summary();
        match summary.write_to_file(&path) {
            Ok(()) => info!(path = %path.display(), "wrote run summary"),
            Err(e) => warn!(error = %e, "cannot write run summary"),
        }
    }

    if signals.is_stop_requested() {
        process::exit(EXIT_CODE_CANCELLED);
    }
}
