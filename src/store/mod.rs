// src/store/mod.rs

//! Persistence / state query layer.
//!
//! The scheduler only sees the [`StateStore`] trait. Two implementations
//! ship with the crate:
//! - [`MemoryStateStore`]: everything in process memory (tests, dry runs);
//! - [`FileStateStore`]: the same data persisted as TOML under a state
//!   directory, with the scheduler lock as a separate file.

pub mod file;
pub mod lock;
pub mod memory;

use std::collections::BTreeSet;

use crate::errors::Result;
use crate::job::{Job, JobId};
use crate::types::{InputId, InputIdType};

pub use file::FileStateStore;
pub use lock::{LockRecord, LockToken};
pub use memory::MemoryStateStore;

/// Abstract storage for input ids, completions, jobs and the scheduler lock.
///
/// All writes are single-record upserts.
pub trait StateStore: Send {
    /// Known input ids of one type.
    fn list_input_ids(&self, id_type: &InputIdType) -> Result<Vec<InputId>>;

    /// Make an input id known. Registering the same id twice is a no-op.
    fn register_input_id(&mut self, input_id: &InputId) -> Result<()>;

    /// Logic names of analyses recorded complete for this input id.
    fn completed_analyses(&self, input_id: &InputId) -> Result<BTreeSet<String>>;

    fn record_completion(&mut self, input_id: &InputId, logic_name: &str) -> Result<()>;

    /// Whether a global accumulator analysis has completed.
    fn accumulator_completed(&self, logic_name: &str) -> Result<bool> {
        Ok(self
            .completed_analyses(&InputId::accumulator())?
            .contains(logic_name))
    }

    /// All jobs ever created for this input id, any analysis, any status.
    fn jobs_for(&self, input_id: &InputId) -> Result<Vec<Job>>;

    fn job(&self, id: JobId) -> Result<Option<Job>>;

    /// Jobs that are neither SUCCESSFUL nor FATAL.
    fn unfinished_jobs(&self) -> Result<Vec<Job>>;

    fn next_job_id(&mut self) -> Result<JobId>;

    fn upsert_job(&mut self, job: &Job) -> Result<()>;

    /// Create the lock record. Fails with `AlreadyLocked` if one exists.
    fn acquire_lock(&mut self, record: &LockRecord) -> Result<()>;

    /// Remove the lock record if present.
    fn release_lock(&mut self) -> Result<()>;

    fn current_lock(&self) -> Result<Option<LockRecord>>;
}
