//! Local worker loop tests
//!
//! - the persisted queue shrinks by exactly one job per execution
//! - draining an empty queue touches nothing
//! - a restarted worker resumes from what was persisted

use std::fs;
use std::sync::Mutex;

use taskcrunch::{
    FileQueueStore, Job, JobExecutor, JobOutcome, LocalWorker, QueueNames, QueueStore,
};
use tempfile::TempDir;

fn jobs(items: &[&str]) -> Vec<Job> {
    items.iter().map(|s| Job::from(*s)).collect()
}

/// Snapshots the persisted local queue every time a job starts.
struct Snapshotter {
    names: QueueNames,
    snapshots: Mutex<Vec<Vec<Job>>>,
}

impl JobExecutor for Snapshotter {
    fn run(&self, _job: &Job) -> JobOutcome {
        let persisted = FileQueueStore::new().read_all(&self.names.local(0)).unwrap();
        self.snapshots.lock().unwrap().push(persisted);
        JobOutcome::Success
    }
}

#[test]
fn test_queue_persisted_after_every_job() {
    let temp = TempDir::new().unwrap();
    let names = QueueNames::new(temp.path().join("work.txt"));
    let store = FileQueueStore::new();
    store.write_all(&names.local(0), &jobs(&["a", "b", "c", "d"])).unwrap();

    let executor = Snapshotter {
        names: names.clone(),
        snapshots: Mutex::new(Vec::new()),
    };
    let mut worker = LocalWorker::new(0, &names, &store, &executor);
    worker.drain(&|| false).unwrap();

    // A crash during job k leaves exactly the jobs popped before it removed.
    let snapshots = executor.snapshots.into_inner().unwrap();
    assert_eq!(
        snapshots,
        vec![
            jobs(&["a", "b", "c", "d"]),
            jobs(&["a", "b", "c"]),
            jobs(&["a", "b"]),
            jobs(&["a"]),
        ]
    );
    assert!(store.read_all(&names.local(0)).unwrap().is_empty());
}

#[test]
fn test_empty_queue_drain_touches_nothing() {
    let temp = TempDir::new().unwrap();
    let names = QueueNames::new(temp.path().join("work.txt"));
    let store = FileQueueStore::new();
    store.write_all(&names.local(0), &[]).unwrap();
    let before = fs::metadata(names.local(0)).unwrap().modified().unwrap();

    let executor = Snapshotter {
        names: names.clone(),
        snapshots: Mutex::new(Vec::new()),
    };
    let mut worker = LocalWorker::new(0, &names, &store, &executor);
    let report = worker.drain(&|| false).unwrap();

    assert_eq!(report.executed, 0);
    assert_eq!(fs::metadata(names.local(0)).unwrap().modified().unwrap(), before);
    assert!(!store.exists(&names.failed(0)));
    assert!(!temp.path().join("work.txt.0.tmp").exists());
}

#[test]
fn test_restart_resumes_from_persisted_queue() {
    let temp = TempDir::new().unwrap();
    let names = QueueNames::new(temp.path().join("work.txt"));
    let store = FileQueueStore::new();
    store.write_all(&names.local(0), &jobs(&["x", "y", "z"])).unwrap();

    struct Recorder(Mutex<Vec<String>>);
    impl JobExecutor for Recorder {
        fn run(&self, job: &Job) -> JobOutcome {
            self.0.lock().unwrap().push(job.to_string());
            JobOutcome::Success
        }
    }

    // First worker is stopped after one job.
    let first = Recorder(Mutex::new(Vec::new()));
    let report = LocalWorker::new(0, &names, &store, &first)
        .drain(&|| true)
        .unwrap();
    assert!(report.interrupted);
    assert_eq!(first.0.into_inner().unwrap(), vec!["z"]);

    // A new worker picks up the rest and nothing runs twice.
    let second = Recorder(Mutex::new(Vec::new()));
    LocalWorker::new(0, &names, &store, &second)
        .drain(&|| false)
        .unwrap();
    assert_eq!(second.0.into_inner().unwrap(), vec!["y", "x"]);
}

#[test]
#[cfg(unix)]
fn test_shell_failures_recorded_per_rank() {
    let temp = TempDir::new().unwrap();
    let names = QueueNames::new(temp.path().join("work.txt"));
    let store = FileQueueStore::new();
    store
        .write_all(&names.local(4), &jobs(&["false", "true", "exit 7"]))
        .unwrap();

    let executor = taskcrunch::ShellExecutor::default();
    let mut worker = LocalWorker::new(4, &names, &store, &executor);
    let report = worker.drain(&|| false).unwrap();

    assert_eq!(report.executed, 3);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(
        fs::read_to_string(names.failed(4)).unwrap(),
        "exit 7\nfalse\n"
    );
}
