// tests/file_store.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::tempdir;

use rulesched::dag::Analysis;
use rulesched::errors::SchedulerError;
use rulesched::exec::SubmissionHandle;
use rulesched::fs::FileSystem;
use rulesched::fs::mock::MockFileSystem;
use rulesched::job::{Job, JobStatus};
use rulesched::store::{FileStateStore, MemoryStateStore, StateStore};
use rulesched::types::{InputId, InputIdType};

fn populate<S: StateStore>(store: &mut S) -> Job {
    let chr1 = InputId::new("chr1", "SLICE");
    store.register_input_id(&chr1).unwrap();
    store.register_input_id(&InputId::new("ctg9", "CONTIG")).unwrap();
    store.record_completion(&chr1, "Submit").unwrap();
    store.record_completion(&InputId::accumulator(), "GenomeStats").unwrap();

    let analysis = Analysis::new(2, "RepeatMask", "SLICE");
    let id = store.next_job_id().unwrap();
    let now = Utc::now();
    let mut job = Job::new(id, &analysis, chr1, &PathBuf::from("out"), now);
    job.transition(JobStatus::Submitted, now).unwrap();
    job.submission = Some(SubmissionHandle("proc-42-1".to_string()));
    store.upsert_job(&job).unwrap();
    job
}

fn assert_populated<S: StateStore>(store: &S, job: &Job) {
    let chr1 = InputId::new("chr1", "SLICE");
    assert_eq!(store.list_input_ids(&InputIdType::new("SLICE")).unwrap(), vec![chr1.clone()]);
    assert_eq!(store.list_input_ids(&InputIdType::new("CONTIG")).unwrap().len(), 1);
    assert!(store.completed_analyses(&chr1).unwrap().contains("Submit"));
    assert!(store.accumulator_completed("GenomeStats").unwrap());
    assert_eq!(store.job(job.id).unwrap().as_ref(), Some(job));
    assert_eq!(store.jobs_for(&chr1).unwrap(), vec![job.clone()]);
    assert_eq!(store.unfinished_jobs().unwrap().len(), 1);
}

#[test]
fn test_state_survives_reopen_on_mock_fs() {
    let fs = MockFileSystem::new();
    let job = {
        let mut store = FileStateStore::open_with(Arc::new(fs.clone()), "state").unwrap();
        populate(&mut store)
    };
    assert_eq!(
        fs.paths(),
        vec![
            PathBuf::from("state/completions.toml"),
            PathBuf::from("state/input_ids.toml"),
            PathBuf::from(format!("state/jobs/{}.toml", job.id)),
        ]
    );

    let mut reopened = FileStateStore::open_with(Arc::new(fs.clone()), "state").unwrap();
    assert_populated(&reopened, &job);

    // Job ids keep counting from where the previous run stopped.
    assert_eq!(reopened.next_job_id().unwrap(), job.id + 1);
}

#[test]
fn test_state_survives_reopen_on_disk() {
    let dir = tempdir().unwrap();
    let job = {
        let mut store = FileStateStore::open(dir.path()).unwrap();
        populate(&mut store)
    };

    let reopened = FileStateStore::open(dir.path()).unwrap();
    assert_populated(&reopened, &job);
}

#[test]
fn test_memory_store_snapshot_round_trip() {
    let mut store = MemoryStateStore::new();
    let job = populate(&mut store);

    let restored = MemoryStateStore::from_snapshot(store.snapshot());
    assert_populated(&restored, &job);
    assert_eq!(restored.all_jobs(), store.all_jobs());
}

#[test]
fn test_registering_twice_is_a_noop() {
    let mut store = MemoryStateStore::new();
    let chr1 = InputId::new("chr1", "SLICE");
    store.register_input_id(&chr1).unwrap();
    store.register_input_id(&chr1).unwrap();
    assert_eq!(store.list_input_ids(&InputIdType::new("SLICE")).unwrap().len(), 1);
}

#[test]
fn test_corrupt_state_file_is_an_error() {
    let fs = MockFileSystem::new();
    fs.add_file("state/jobs/12.toml", "jobs = 12 = oops");
    assert!(FileStateStore::open_with(Arc::new(fs), "state").is_err());
}

#[test]
fn test_each_write_touches_only_its_own_record() {
    let fs = MockFileSystem::new();
    let mut store = FileStateStore::open_with(Arc::new(fs.clone()), "state").unwrap();
    let mut job = populate(&mut store);
    let input_ids = fs.read_to_string(Path::new("state/input_ids.toml")).unwrap();

    // Re-registering and re-completing append nothing.
    store.register_input_id(&InputId::new("chr1", "SLICE")).unwrap();
    store.record_completion(&InputId::new("chr1", "SLICE"), "Submit").unwrap();
    assert_eq!(fs.read_to_string(Path::new("state/input_ids.toml")).unwrap(), input_ids);
    let completions = fs.read_to_string(Path::new("state/completions.toml")).unwrap();
    assert_eq!(completions.matches("[[completion]]").count(), 2);

    store.register_input_id(&InputId::new("chr2", "SLICE")).unwrap();
    let grown = fs.read_to_string(Path::new("state/input_ids.toml")).unwrap();
    assert!(grown.starts_with(&input_ids));
    assert_eq!(grown.matches("[[input_id]]").count(), 3);

    job.transition(JobStatus::Running, Utc::now()).unwrap();
    store.upsert_job(&job).unwrap();
    let record = fs
        .read_to_string(&PathBuf::from(format!("state/jobs/{}.toml", job.id)))
        .unwrap();
    assert!(record.contains("RUNNING"));
    assert_eq!(fs.read_to_string(Path::new("state/input_ids.toml")).unwrap(), grown);
}

#[test]
fn test_failed_write_leaves_store_unchanged() {
    let fs = MockFileSystem::new();
    let mut store = FileStateStore::open_with(Arc::new(fs.clone()), "state").unwrap();
    let job = populate(&mut store);
    let chr2 = InputId::new("chr2", "SLICE");

    fs.fail_writes(true);
    let mut running = job.clone();
    running.transition(JobStatus::Running, Utc::now()).unwrap();
    assert!(matches!(store.upsert_job(&running), Err(SchedulerError::Store(_))));
    assert!(store.register_input_id(&chr2).is_err());
    assert!(store.record_completion(&job.input_id, "RepeatMask").is_err());

    assert_eq!(store.job(job.id).unwrap(), Some(job.clone()));
    assert_eq!(store.list_input_ids(&InputIdType::new("SLICE")).unwrap().len(), 1);
    assert!(!store.completed_analyses(&job.input_id).unwrap().contains("RepeatMask"));

    // Once the disk recovers, the same writes go through and survive a reopen.
    fs.fail_writes(false);
    store.upsert_job(&running).unwrap();
    store.register_input_id(&chr2).unwrap();

    let reopened = FileStateStore::open_with(Arc::new(fs.clone()), "state").unwrap();
    assert_eq!(reopened.job(job.id).unwrap(), Some(running));
    assert_eq!(reopened.list_input_ids(&InputIdType::new("SLICE")).unwrap().len(), 2);
}
