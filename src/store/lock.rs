// src/store/lock.rs

//! Singleton lock guaranteeing one live scheduler per work set.
//!
//! Acquisition never preempts: if a record exists, start-up fails with the
//! holder's identity. A process that dies without releasing leaves the
//! record behind; removing it is a manual operator step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::{Result, SchedulerError};
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    pub host: String,
    pub pid: u32,
    pub since: DateTime<Utc>,
}

impl LockRecord {
    /// Identity of the running process.
    pub fn for_current_process() -> Self {
        let owner = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let host = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|s| s.trim().to_string())
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            owner,
            host,
            pid: std::process::id(),
            since: Utc::now(),
        }
    }

    /// The error reported to whoever finds this record in place.
    pub fn already_locked(&self) -> SchedulerError {
        SchedulerError::AlreadyLocked {
            owner: self.owner.clone(),
            host: self.host.clone(),
            pid: self.pid,
            since: self.since,
        }
    }
}

/// Proof that this process holds the lock.
#[derive(Debug)]
pub struct LockToken {
    record: LockRecord,
}

impl LockToken {
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Remove the lock record. Safe to call when it is already gone.
    pub fn release<S: StateStore + ?Sized>(self, store: &mut S) -> Result<()> {
        store.release_lock()?;
        info!(
            owner = %self.record.owner,
            pid = self.record.pid,
            "scheduler lock released"
        );
        Ok(())
    }
}

/// Take the scheduler lock for the current process.
pub fn acquire<S: StateStore + ?Sized>(store: &mut S) -> Result<LockToken> {
    acquire_as(store, LockRecord::for_current_process())
}

/// Take the scheduler lock under an explicit identity.
pub fn acquire_as<S: StateStore + ?Sized>(store: &mut S, record: LockRecord) -> Result<LockToken> {
    match store.acquire_lock(&record) {
        Ok(()) => {
            info!(
                owner = %record.owner,
                host = %record.host,
                pid = record.pid,
                "scheduler lock acquired"
            );
            Ok(LockToken { record })
        }
        Err(e) => {
            if let SchedulerError::AlreadyLocked {
                ref owner,
                ref host,
                pid,
                since,
            } = e
            {
                error!(
                    %owner,
                    %host,
                    pid,
                    %since,
                    "another scheduler holds the lock; refusing to start"
                );
            }
            Err(e)
        }
    }
}
