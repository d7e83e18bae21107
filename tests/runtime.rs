// tests/runtime.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rulesched::dag::{RuleSet, RuleSource, RuleStore, StaticRuleSource};
use rulesched::engine::{ControlMessage, Runtime, RuntimeOptions, Scheduler, control_channel};
use rulesched::errors::{Result, SchedulerError};
use rulesched::fs::mock::MockFileSystem;
use rulesched::job::JobStatus;
use rulesched::store::{MemoryStateStore, StateStore};
use rulesched::types::InputId;
use rulesched_test_utils::builders::repeatmask_genscan;
use rulesched_test_utils::fake_backend::FakeBatchBackend;
use rulesched_test_utils::{fast_options, init_tracing, mock_job_manager, with_timeout};

fn seeded_store() -> MemoryStateStore {
    let mut store = MemoryStateStore::new();
    for id in ["chr1", "chr2", "chr3"] {
        let input_id = InputId::new(id, "SLICE");
        store.register_input_id(&input_id).unwrap();
        store.record_completion(&input_id, "Submit").unwrap();
    }
    store
}

fn runtime_options(once: bool) -> RuntimeOptions {
    RuntimeOptions {
        exit_after_pass: once,
        idle_sleep: Duration::from_secs(60),
        drain_poll: Duration::from_millis(10),
    }
}

fn build_runtime(
    backend: &FakeBatchBackend,
    rules: RuleStore,
    once: bool,
) -> (
    tokio::sync::mpsc::Sender<ControlMessage>,
    Runtime<MemoryStateStore, FakeBatchBackend>,
) {
    init_tracing();
    let fs = MockFileSystem::new();
    let scheduler = Scheduler::new(seeded_store(), backend.clone(), mock_job_manager(&fs), fast_options(), None);
    let (tx, control) = control_channel();
    (tx, Runtime::new(scheduler, rules, control, runtime_options(once)))
}

/// Counts loads; fails every load after the first if `fail_reload` is set.
struct CountingSource {
    rules: RuleSet,
    loads: Arc<AtomicUsize>,
    fail_reload: bool,
}

impl RuleSource for CountingSource {
    fn load(&self) -> Result<RuleSet> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst);
        if n > 0 && self.fail_reload {
            return Err(SchedulerError::RuleCycle("A -> B -> A".to_string()));
        }
        Ok(self.rules.clone())
    }
}

#[tokio::test]
async fn test_once_runs_a_single_pass_and_drains() {
    let backend = FakeBatchBackend::new();
    backend.complete_all_with(JobStatus::Successful);
    let rules = RuleStore::load(StaticRuleSource(repeatmask_genscan(3).build_rules())).unwrap();
    let (_tx, mut rt) = build_runtime(&backend, rules, true);

    with_timeout(rt.run()).await.unwrap();
    assert_eq!(rt.passes(), 1);

    let (store, _) = rt.into_scheduler().into_parts();
    let jobs = store.all_jobs();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.analysis == "RepeatMask" && j.status == JobStatus::Successful));
}

#[tokio::test]
async fn test_terminate_during_idle_sleep_stops_runtime() {
    let backend = FakeBatchBackend::new();
    backend.complete_all_with(JobStatus::Successful);
    let rules = RuleStore::load(StaticRuleSource(repeatmask_genscan(3).build_rules())).unwrap();
    let (tx, mut rt) = build_runtime(&backend, rules, false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(ControlMessage::Terminate).await;
    });

    with_timeout(rt.run()).await.unwrap();
    assert!(rt.passes() >= 3);

    let (store, _) = rt.into_scheduler().into_parts();
    let jobs = store.all_jobs();
    assert_eq!(jobs.len(), 6);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Successful));
}

#[tokio::test]
async fn test_terminate_before_start_runs_no_pass() {
    let backend = FakeBatchBackend::new();
    let rules = RuleStore::load(StaticRuleSource(repeatmask_genscan(3).build_rules())).unwrap();
    let (tx, mut rt) = build_runtime(&backend, rules, false);

    tx.send(ControlMessage::Terminate).await.unwrap();
    with_timeout(rt.run()).await.unwrap();

    assert_eq!(rt.passes(), 0);
    assert_eq!(backend.submission_count(), 0);
}

#[tokio::test]
async fn test_second_terminate_abandons_drain() {
    let backend = FakeBatchBackend::new();
    // The batch system never empties.
    backend.set_pending(1);
    let rules = RuleStore::load(StaticRuleSource(repeatmask_genscan(3).build_rules())).unwrap();
    let (tx, mut rt) = build_runtime(&backend, rules, true);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(ControlMessage::Terminate).await;
    });

    with_timeout(rt.run()).await.unwrap();
    assert_eq!(rt.passes(), 1);
    assert_eq!(backend.submission_count(), 3);
}

#[tokio::test]
async fn test_reload_request_rereads_rules() {
    let loads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        rules: repeatmask_genscan(3).build_rules(),
        loads: Arc::clone(&loads),
        fail_reload: false,
    };
    let backend = FakeBatchBackend::new();
    let (tx, mut rt) = build_runtime(&backend, RuleStore::load(source).unwrap(), true);

    tx.send(ControlMessage::ReloadRules).await.unwrap();
    with_timeout(rt.run()).await.unwrap();

    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(backend.submission_count(), 3);
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_rules() {
    let loads = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        rules: repeatmask_genscan(3).build_rules(),
        loads: Arc::clone(&loads),
        fail_reload: true,
    };
    let mut store = RuleStore::load(source).unwrap();

    assert!(matches!(store.reload(), Err(SchedulerError::RuleCycle(_))));
    assert_eq!(store.snapshot().rules().len(), 2);

    let backend = FakeBatchBackend::new();
    let (tx, mut rt) = build_runtime(&backend, store, true);
    tx.send(ControlMessage::ReloadRules).await.unwrap();
    with_timeout(rt.run()).await.unwrap();

    // The pass still ran against the rules loaded first.
    assert_eq!(backend.submission_count(), 3);
    assert_eq!(loads.load(Ordering::SeqCst), 3);
}
