// src/store/memory.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, SchedulerError};
use crate::job::{Job, JobId};
use crate::store::StateStore;
use crate::store::lock::LockRecord;
use crate::types::{InputId, InputIdType};

/// One row of the completion table, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub analysis: String,
    pub input_id: InputId,
}

/// Flat, serializable form of the store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub next_job_id: JobId,
    #[serde(default)]
    pub input_ids: Vec<InputId>,
    #[serde(default)]
    pub completions: Vec<CompletionRecord>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// Stores everything in memory only (lost on restart).
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    input_ids: BTreeMap<InputIdType, BTreeSet<InputId>>,
    completions: BTreeMap<InputId, BTreeSet<String>>,
    jobs: BTreeMap<JobId, Job>,
    last_job_id: JobId,
    lock: Option<LockRecord>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut store = Self::new();
        for input_id in snapshot.input_ids {
            store
                .input_ids
                .entry(input_id.id_type.clone())
                .or_default()
                .insert(input_id);
        }
        for c in snapshot.completions {
            store
                .completions
                .entry(c.input_id)
                .or_default()
                .insert(c.analysis);
        }
        let max_seen = snapshot.jobs.iter().map(|j| j.id).max().unwrap_or(0);
        for job in snapshot.jobs {
            store.jobs.insert(job.id, job);
        }
        store.last_job_id = snapshot.next_job_id.max(max_seen);
        store
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            next_job_id: self.last_job_id,
            input_ids: self
                .input_ids
                .values()
                .flat_map(|ids| ids.iter().cloned())
                .collect(),
            completions: self
                .completions
                .iter()
                .flat_map(|(input_id, names)| {
                    names.iter().map(move |analysis| CompletionRecord {
                        analysis: analysis.clone(),
                        input_id: input_id.clone(),
                    })
                })
                .collect(),
            jobs: self.jobs.values().cloned().collect(),
        }
    }

    /// Every job, in id order. Handy for assertions.
    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.values().cloned().collect()
    }
}

impl StateStore for MemoryStateStore {
    fn list_input_ids(&self, id_type: &InputIdType) -> Result<Vec<InputId>> {
        Ok(self
            .input_ids
            .get(id_type)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn register_input_id(&mut self, input_id: &InputId) -> Result<()> {
        let inserted = self
            .input_ids
            .entry(input_id.id_type.clone())
            .or_default()
            .insert(input_id.clone());
        if inserted {
            debug!(input_id = %input_id, "registered input id");
        }
        Ok(())
    }

    fn completed_analyses(&self, input_id: &InputId) -> Result<BTreeSet<String>> {
        Ok(self.completions.get(input_id).cloned().unwrap_or_default())
    }

    fn record_completion(&mut self, input_id: &InputId, logic_name: &str) -> Result<()> {
        self.completions
            .entry(input_id.clone())
            .or_default()
            .insert(logic_name.to_string());
        Ok(())
    }

    fn jobs_for(&self, input_id: &InputId) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .values()
            .filter(|j| &j.input_id == input_id)
            .cloned()
            .collect())
    }

    fn job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).cloned())
    }

    fn unfinished_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .values()
            .filter(|j| j.is_active())
            .cloned()
            .collect())
    }

    fn next_job_id(&mut self) -> Result<JobId> {
        self.last_job_id += 1;
        Ok(self.last_job_id)
    }

    fn upsert_job(&mut self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn acquire_lock(&mut self, record: &LockRecord) -> Result<()> {
        if let Some(ref held) = self.lock {
            return Err(held.already_locked());
        }
        self.lock = Some(record.clone());
        Ok(())
    }

    fn release_lock(&mut self) -> Result<()> {
        self.lock = None;
        Ok(())
    }

    fn current_lock(&self) -> Result<Option<LockRecord>> {
        Ok(self.lock.clone())
    }
}

impl From<StoreSnapshot> for MemoryStateStore {
    fn from(snapshot: StoreSnapshot) -> Self {
        Self::from_snapshot(snapshot)
    }
}

/// Error helper shared by the file-backed store.
pub(crate) fn store_error(context: &str, err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Store(format!("{context}: {err}"))
}
