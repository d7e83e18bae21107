// tests/job_lifecycle.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use rulesched::dag::{Analysis, RuleSet};
use rulesched::exec::{BatchBackend, ProcessBatchBackend, RunnerCommand, SubmissionHandle};
use rulesched::fs::{FileSystem, RealFileSystem};
use rulesched::fs::mock::MockFileSystem;
use rulesched::job::{Job, JobManager, JobStatus, ReadyReason, ReconcileOutcome};
use rulesched::store::{MemoryStateStore, StateStore};
use rulesched::types::InputId;
use rulesched_test_utils::builders::{AnalysisConfigBuilder, ConfigFileBuilder, repeatmask_genscan};
use rulesched_test_utils::fake_backend::FakeBatchBackend;
use rulesched_test_utils::{init_tracing, mock_job_manager, with_timeout};

struct Fixture {
    rules: RuleSet,
    store: MemoryStateStore,
    backend: FakeBatchBackend,
    fs: MockFileSystem,
    jobs: JobManager,
    chr1: InputId,
}

impl Fixture {
    fn new(rules: RuleSet) -> Self {
        init_tracing();
        let fs = MockFileSystem::new();
        Self {
            rules,
            store: MemoryStateStore::new(),
            backend: FakeBatchBackend::new(),
            jobs: mock_job_manager(&fs),
            fs,
            chr1: InputId::new("chr1", "SLICE"),
        }
    }

    fn analysis(&self, name: &str) -> Analysis {
        self.rules.analysis(name).cloned().unwrap()
    }

    async fn reconcile(&mut self, name: &str) -> ReconcileOutcome {
        let analysis = self.analysis(name);
        self.jobs
            .reconcile(
                &mut self.store,
                &mut self.backend,
                &self.chr1,
                &analysis,
                ReadyReason::RulesSatisfied,
            )
            .await
            .unwrap()
    }

    fn report(&mut self, job_id: u64, status: JobStatus) -> usize {
        self.backend.push_outcome(job_id, status);
        let outcomes = self.backend.collect_outcomes();
        self.jobs.apply_outcomes(&mut self.store, &outcomes).unwrap()
    }

    fn job(&self, id: u64) -> Job {
        self.store.job(id).unwrap().unwrap()
    }
}

#[test]
fn test_status_transitions() {
    use JobStatus::*;

    assert!(Created.can_transition_to(Submitted));
    assert!(!Created.can_transition_to(Running));
    assert!(Submitted.can_transition_to(Running));
    assert!(Running.can_transition_to(Writing));
    assert!(!Running.can_transition_to(Running));
    assert!(Running.can_transition_to(Successful));
    assert!(Submitted.can_transition_to(Failed));
    assert!(Failed.can_transition_to(Retried));
    assert!(Killed.can_transition_to(Fatal));
    assert!(Retried.can_transition_to(Submitted));
    assert!(!Successful.can_transition_to(Failed));
    assert!(!Fatal.can_transition_to(Retried));
    assert!(Successful.is_terminal() && Fatal.is_terminal());
}

#[test]
fn test_illegal_transition_is_rejected_and_leaves_job_untouched() {
    let analysis = Analysis::new(1, "RepeatMask", "SLICE");
    let now = Utc::now();
    let mut job = Job::new(1, &analysis, InputId::new("chr1", "SLICE"), &PathBuf::from("out"), now);

    let err = job.transition(JobStatus::Successful, now).unwrap_err();
    assert!(err.to_string().contains("CREATED"));
    assert_eq!(job.status, JobStatus::Created);
    assert_eq!(job.stdout_file, PathBuf::from("out/RepeatMask/chr1.1.out"));
}

#[tokio::test]
async fn test_reconcile_creates_once_and_is_idempotent() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());

    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::Created(1));
    let job = f.job(1);
    assert_eq!(job.status, JobStatus::Submitted);
    assert_eq!(job.submission, Some(SubmissionHandle("fake-1".to_string())));

    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::AlreadyActive(1));
    f.report(1, JobStatus::Running);
    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::AlreadyActive(1));

    assert_eq!(f.backend.submission_count(), 1);
    assert_eq!(f.store.jobs_for(&f.chr1).unwrap().len(), 1);
}

#[tokio::test]
async fn test_successful_outcome_records_completion() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    f.reconcile("RepeatMask").await;

    assert_eq!(f.report(1, JobStatus::Running), 1);
    assert_eq!(f.report(1, JobStatus::Successful), 1);

    assert_eq!(f.job(1).status, JobStatus::Successful);
    assert!(f.store.completed_analyses(&f.chr1).unwrap().contains("RepeatMask"));
    assert!(f.store.unfinished_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn test_retries_then_fatal_after_max_retries_plus_one_failures() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    assert_eq!(f.reconcile("Genscan").await, ReconcileOutcome::Created(1));

    for attempt in 1..=3 {
        f.report(1, JobStatus::Failed);
        assert_eq!(f.reconcile("Genscan").await, ReconcileOutcome::Retried(1));
        let job = f.job(1);
        assert_eq!(job.retry_count, attempt);
        assert_eq!(job.status, JobStatus::Submitted);
    }

    f.report(1, JobStatus::Failed);
    assert_eq!(f.reconcile("Genscan").await, ReconcileOutcome::Escalated(1));
    assert_eq!(f.job(1).status, JobStatus::Fatal);

    // Never resubmitted, and no replacement job is created.
    assert_eq!(f.reconcile("Genscan").await, ReconcileOutcome::BlockedByFatal(1));
    assert_eq!(f.backend.submission_count(), 4);
    assert_eq!(f.store.jobs_for(&f.chr1).unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_retries_goes_straight_to_fatal() {
    let rules = ConfigFileBuilder::new()
        .with_analysis("Submit", AnalysisConfigBuilder::new("SLICE").build())
        .with_analysis(
            "Once",
            AnalysisConfigBuilder::new("SLICE").condition("Submit").max_retries(0).build(),
        )
        .build_rules();
    let mut f = Fixture::new(rules);

    f.reconcile("Once").await;
    f.report(1, JobStatus::Killed);
    assert_eq!(f.reconcile("Once").await, ReconcileOutcome::Escalated(1));
}

#[tokio::test]
async fn test_retry_archives_previous_output() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    f.reconcile("RepeatMask").await;

    let job = f.job(1);
    f.fs.add_file(&job.stdout_file, "first attempt");
    f.fs.add_file(&job.stderr_file, "boom");

    f.report(1, JobStatus::Failed);
    f.reconcile("RepeatMask").await;

    let mut archived = job.stdout_file.clone().into_os_string();
    archived.push(".retry0");
    assert!(f.fs.exists(&PathBuf::from(archived)));
    assert!(!f.fs.exists(&job.stdout_file));
    assert!(!f.fs.exists(&job.stderr_file));
}

#[tokio::test]
async fn test_archiving_can_be_disabled() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    f.jobs = JobManager::new("out", false, std::sync::Arc::new(f.fs.clone()));
    f.reconcile("RepeatMask").await;

    let job = f.job(1);
    f.fs.add_file(&job.stdout_file, "first attempt");
    f.report(1, JobStatus::Failed);
    f.reconcile("RepeatMask").await;

    assert!(f.fs.exists(&job.stdout_file));
}

#[tokio::test]
async fn test_failed_submission_leaves_job_created_without_using_a_retry() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    f.backend.fail_next_submissions(1);

    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::SubmissionFailed(1));
    let job = f.job(1);
    assert_eq!(job.status, JobStatus::Created);
    assert_eq!(job.retry_count, 0);

    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::Resubmitted(1));
    let job = f.job(1);
    assert_eq!(job.status, JobStatus::Submitted);
    assert_eq!(job.retry_count, 0);
    assert_eq!(f.store.jobs_for(&f.chr1).unwrap().len(), 1);
}

#[tokio::test]
async fn test_timed_out_job_is_killed_and_retried() {
    let rules = ConfigFileBuilder::new()
        .with_analysis("Submit", AnalysisConfigBuilder::new("SLICE").build())
        .with_analysis(
            "Slow",
            AnalysisConfigBuilder::new("SLICE").condition("Submit").timeout("1s").build(),
        )
        .build_rules();
    let mut f = Fixture::new(rules);
    f.reconcile("Slow").await;

    let killed = f
        .jobs
        .check_timeouts(&mut f.store, &mut f.backend, &f.rules, Utc::now())
        .await
        .unwrap();
    assert!(killed.is_empty());

    let later = Utc::now() + ChronoDuration::seconds(10);
    let killed = f
        .jobs
        .check_timeouts(&mut f.store, &mut f.backend, &f.rules, later)
        .await
        .unwrap();
    assert_eq!(killed, vec![1]);
    assert_eq!(f.backend.state().killed, vec![1]);
    assert_eq!(f.job(1).status, JobStatus::Killed);

    // A late success from the killed attempt is stale.
    assert_eq!(f.report(1, JobStatus::Successful), 0);
    assert!(f.store.completed_analyses(&f.chr1).unwrap().is_empty());

    assert_eq!(f.reconcile("Slow").await, ReconcileOutcome::Retried(1));
}

#[tokio::test]
async fn test_report_from_earlier_attempt_is_ignored() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    f.reconcile("RepeatMask").await;
    f.report(1, JobStatus::Failed);
    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::Retried(1));

    f.backend.push_outcome_for_attempt(1, 0, JobStatus::Running);
    let outcomes = f.backend.collect_outcomes();
    assert_eq!(f.jobs.apply_outcomes(&mut f.store, &outcomes).unwrap(), 0);
    assert_eq!(f.job(1).status, JobStatus::Submitted);

    assert_eq!(f.report(1, JobStatus::Running), 1);
}

#[tokio::test]
async fn test_timed_out_process_is_retried_on_the_same_backend() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("first-attempt-started");
    let runner = format!(
        "if [ -e '{m}' ]; then exit 0; fi; touch '{m}'; sleep 30",
        m = marker.display()
    );

    let rules = ConfigFileBuilder::new()
        .with_analysis("Submit", AnalysisConfigBuilder::new("SLICE").build())
        .with_analysis(
            "Slow",
            AnalysisConfigBuilder::new("SLICE").condition("Submit").timeout("1s").build(),
        )
        .build_rules();
    let analysis = rules.analysis("Slow").cloned().unwrap();
    let chr1 = InputId::new("chr1", "SLICE");
    let mut store = MemoryStateStore::new();
    let mut backend = ProcessBatchBackend::new(RunnerCommand::new(runner), 1);
    let jobs = JobManager::new(dir.path().join("out"), true, Arc::new(RealFileSystem));

    let outcome = jobs
        .reconcile(&mut store, &mut backend, &chr1, &analysis, ReadyReason::RulesSatisfied)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Created(1));

    with_timeout(async {
        while !marker.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let later = Utc::now() + ChronoDuration::seconds(10);
    let killed = jobs
        .check_timeouts(&mut store, &mut backend, &rules, later)
        .await
        .unwrap();
    assert_eq!(killed, vec![1]);

    let outcome = jobs
        .reconcile(&mut store, &mut backend, &chr1, &analysis, ReadyReason::RulesSatisfied)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Retried(1));

    with_timeout(async {
        loop {
            let outcomes = backend.collect_outcomes();
            jobs.apply_outcomes(&mut store, &outcomes).unwrap();
            if store.job(1).unwrap().unwrap().status == JobStatus::Successful {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let job = store.job(1).unwrap().unwrap();
    assert_eq!(job.retry_count, 1);
    assert!(store.completed_analyses(&chr1).unwrap().contains("Slow"));
    assert_eq!(backend.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recover_orphans_kills_jobs_from_previous_run() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    let analysis = f.analysis("RepeatMask");
    let now = Utc::now();

    let mut orphan = Job::new(7, &analysis, f.chr1.clone(), &PathBuf::from("out"), now);
    orphan.transition(JobStatus::Submitted, now).unwrap();
    orphan.submission = Some(SubmissionHandle("proc-1-7".to_string()));
    f.store.upsert_job(&orphan).unwrap();

    let chr2 = InputId::new("chr2", "SLICE");
    let mut live = Job::new(8, &analysis, chr2, &PathBuf::from("out"), now);
    live.transition(JobStatus::Submitted, now).unwrap();
    live.submission = Some(SubmissionHandle("fake-8".to_string()));
    f.store.upsert_job(&live).unwrap();

    let recovered = f.jobs.recover_orphans(&mut f.store, &f.backend).unwrap();
    assert_eq!(recovered, vec![7]);
    assert_eq!(f.job(7).status, JobStatus::Killed);
    assert_eq!(f.job(8).status, JobStatus::Submitted);

    // The orphan re-enters the retry path instead of spawning a new job.
    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::Retried(7));
}

#[tokio::test]
async fn test_synchronous_backend_outcomes_are_applied_on_submit() {
    let mut f = Fixture::new(repeatmask_genscan(3).build_rules());
    f.backend = FakeBatchBackend::new().synchronous();
    f.backend.complete_all_with(JobStatus::Successful);

    assert_eq!(f.reconcile("RepeatMask").await, ReconcileOutcome::Created(1));
    assert_eq!(f.job(1).status, JobStatus::Successful);
    assert!(f.store.completed_analyses(&f.chr1).unwrap().contains("RepeatMask"));
}

#[tokio::test]
async fn test_accumulator_success_is_recorded_globally() {
    let rules = repeatmask_genscan(3)
        .with_analysis(
            "GenomeStats",
            AnalysisConfigBuilder::accumulator().condition("Genscan").build(),
        )
        .build_rules();
    let mut f = Fixture::new(rules);
    let analysis = f.analysis("GenomeStats");

    let outcome = f
        .jobs
        .reconcile(
            &mut f.store,
            &mut f.backend,
            &InputId::accumulator(),
            &analysis,
            ReadyReason::AccumulatorComplete,
        )
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Created(1));

    f.report(1, JobStatus::Successful);
    assert!(f.store.accumulator_completed("GenomeStats").unwrap());
}
