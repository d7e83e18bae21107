// tests/lock.rs

use chrono::Utc;
use tempfile::tempdir;

use rulesched::errors::SchedulerError;
use rulesched::store::lock::{acquire, acquire_as};
use rulesched::store::{FileStateStore, LockRecord, MemoryStateStore, StateStore};

fn record(owner: &str, pid: u32) -> LockRecord {
    LockRecord {
        owner: owner.to_string(),
        host: "farm-head-01".to_string(),
        pid,
        since: Utc::now(),
    }
}

#[test]
fn test_memory_lock_is_exclusive() {
    let mut store = MemoryStateStore::new();
    let token = acquire_as(&mut store, record("alice", 100)).unwrap();

    match acquire_as(&mut store, record("bob", 200)) {
        Err(SchedulerError::AlreadyLocked { owner, host, pid, .. }) => {
            assert_eq!(owner, "alice");
            assert_eq!(host, "farm-head-01");
            assert_eq!(pid, 100);
        }
        other => panic!("Expected AlreadyLocked, got: {:?}", other),
    }

    token.release(&mut store).unwrap();
    assert!(store.current_lock().unwrap().is_none());
    let bob = acquire_as(&mut store, record("bob", 200)).unwrap();
    assert_eq!(bob.record().owner, "bob");
}

#[test]
fn test_file_lock_is_exclusive_across_store_instances() {
    let dir = tempdir().unwrap();
    let mut first = FileStateStore::open(dir.path()).unwrap();
    let mut second = FileStateStore::open(dir.path()).unwrap();

    let token = acquire(&mut first).unwrap();
    assert!(first.lock_path().exists());

    let err = acquire(&mut second).unwrap_err();
    match &err {
        SchedulerError::AlreadyLocked { pid, .. } => assert_eq!(*pid, std::process::id()),
        other => panic!("Expected AlreadyLocked, got: {:?}", other),
    }
    assert!(err.to_string().contains("remove the lock record manually"));

    token.release(&mut first).unwrap();
    assert!(!first.lock_path().exists());
    acquire(&mut second).unwrap();
}

#[test]
fn test_stale_lock_is_never_removed_automatically() {
    let dir = tempdir().unwrap();
    {
        let mut crashed = FileStateStore::open(dir.path()).unwrap();
        // Dropped without release, like a killed scheduler.
        let _token = acquire_as(&mut crashed, record("ghost", 999_999)).unwrap();
    }

    let mut restarted = FileStateStore::open(dir.path()).unwrap();
    match acquire(&mut restarted) {
        Err(SchedulerError::AlreadyLocked { owner, pid, .. }) => {
            assert_eq!(owner, "ghost");
            assert_eq!(pid, 999_999);
        }
        other => panic!("Expected AlreadyLocked, got: {:?}", other),
    }

    // Operator removes the record; start-up works again.
    restarted.release_lock().unwrap();
    acquire(&mut restarted).unwrap();
}

#[test]
fn test_release_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut store = FileStateStore::open(dir.path()).unwrap();
    store.release_lock().unwrap();

    let token = acquire(&mut store).unwrap();
    store.release_lock().unwrap();
    token.release(&mut store).unwrap();
}
