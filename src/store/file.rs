// src/store/file.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::job::{Job, JobId};
use crate::store::StateStore;
use crate::store::lock::LockRecord;
use crate::store::memory::{CompletionRecord, MemoryStateStore, StoreSnapshot, store_error};
use crate::types::{InputId, InputIdType};

const JOBS_DIR: &str = "jobs";
const INPUT_IDS_FILE: &str = "input_ids.toml";
const COMPLETIONS_FILE: &str = "completions.toml";
const LOCK_FILE: &str = "lock.toml";

/// Append-only log of registered input ids, one `[[input_id]]` table each.
#[derive(Debug, Default, Serialize, Deserialize)]
struct InputIdLog {
    #[serde(default)]
    input_id: Vec<InputId>,
}

/// Append-only log of completions, one `[[completion]]` table each.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CompletionLog {
    #[serde(default)]
    completion: Vec<CompletionRecord>,
}

/// Persists state as one record per write under `dir`:
/// - `jobs/<id>.toml`, rewritten atomically on each upsert;
/// - `input_ids.toml` and `completions.toml`, appended to;
/// - `lock.toml`, the scheduler lock.
///
/// Reads are served from memory. Every write reaches disk before the
/// in-memory copy changes, so a failed write leaves the store as it was.
#[derive(Debug)]
pub struct FileStateStore {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    inner: MemoryStateStore,
}

impl FileStateStore {
    /// Open (or start) a store under `dir` on the real filesystem.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(Arc::new(RealFileSystem), dir)
    }

    pub fn open_with(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        let input_ids: InputIdLog = read_log(fs.as_ref(), &dir.join(INPUT_IDS_FILE))?;
        let completions: CompletionLog = read_log(fs.as_ref(), &dir.join(COMPLETIONS_FILE))?;

        let mut jobs = Vec::new();
        for path in fs
            .list_dir(&dir.join(JOBS_DIR))
            .map_err(|e| store_error("listing job records", e))?
        {
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let contents = fs
                .read_to_string(&path)
                .map_err(|e| store_error("reading job record", e))?;
            let job: Job = toml::from_str(&contents)?;
            jobs.push(job);
        }

        let snapshot = StoreSnapshot {
            next_job_id: 0,
            input_ids: input_ids.input_id,
            completions: completions.completion,
            jobs,
        };
        info!(
            dir = ?dir,
            jobs = snapshot.jobs.len(),
            input_ids = snapshot.input_ids.len(),
            completions = snapshot.completions.len(),
            "loaded scheduler state"
        );

        Ok(Self {
            fs,
            dir,
            inner: MemoryStateStore::from_snapshot(snapshot),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.dir.join(JOBS_DIR).join(format!("{id}.toml"))
    }

    fn append_entry<T: Serialize>(&self, file: &str, entry: &T) -> Result<()> {
        let contents = toml::to_string(entry)?;
        self.fs
            .append(&self.dir.join(file), contents.as_bytes())
            .map_err(|e| store_error("appending state record", e))
    }
}

fn read_log<T>(fs: &dyn FileSystem, path: &Path) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if !fs.exists(path) {
        debug!(path = ?path, "no state log yet; starting empty");
        return Ok(T::default());
    }
    let contents = fs
        .read_to_string(path)
        .map_err(|e| store_error("reading state log", e))?;
    Ok(toml::from_str(&contents)?)
}

impl StateStore for FileStateStore {
    fn list_input_ids(&self, id_type: &InputIdType) -> Result<Vec<InputId>> {
        self.inner.list_input_ids(id_type)
    }

    fn register_input_id(&mut self, input_id: &InputId) -> Result<()> {
        if self.inner.list_input_ids(&input_id.id_type)?.contains(input_id) {
            return Ok(());
        }
        let entry = InputIdLog {
            input_id: vec![input_id.clone()],
        };
        self.append_entry(INPUT_IDS_FILE, &entry)?;
        self.inner.register_input_id(input_id)
    }

    fn completed_analyses(&self, input_id: &InputId) -> Result<BTreeSet<String>> {
        self.inner.completed_analyses(input_id)
    }

    fn record_completion(&mut self, input_id: &InputId, logic_name: &str) -> Result<()> {
        if self.inner.completed_analyses(input_id)?.contains(logic_name) {
            return Ok(());
        }
        let entry = CompletionLog {
            completion: vec![CompletionRecord {
                analysis: logic_name.to_string(),
                input_id: input_id.clone(),
            }],
        };
        self.append_entry(COMPLETIONS_FILE, &entry)?;
        self.inner.record_completion(input_id, logic_name)
    }

    fn jobs_for(&self, input_id: &InputId) -> Result<Vec<Job>> {
        self.inner.jobs_for(input_id)
    }

    fn job(&self, id: JobId) -> Result<Option<Job>> {
        self.inner.job(id)
    }

    fn unfinished_jobs(&self) -> Result<Vec<Job>> {
        self.inner.unfinished_jobs()
    }

    /// Not persisted on its own: on reopen, ids continue after the highest
    /// job record on disk, and an id handed out but never upserted has no
    /// record to collide with.
    fn next_job_id(&mut self) -> Result<JobId> {
        self.inner.next_job_id()
    }

    fn upsert_job(&mut self, job: &Job) -> Result<()> {
        let contents = toml::to_string(job)?;
        self.fs
            .write(&self.job_path(job.id), contents.as_bytes())
            .map_err(|e| store_error("writing job record", e))?;
        self.inner.upsert_job(job)
    }

    fn acquire_lock(&mut self, record: &LockRecord) -> Result<()> {
        let path = self.lock_path();
        let contents = toml::to_string(record)?;
        let created = self
            .fs
            .create_new(&path, contents.as_bytes())
            .map_err(|e| store_error("creating lock file", e))?;
        if created {
            return Ok(());
        }
        match self.current_lock()? {
            Some(held) => Err(held.already_locked()),
            None => Err(store_error(
                "lock file exists but is unreadable",
                path.display(),
            )),
        }
    }

    fn release_lock(&mut self) -> Result<()> {
        self.fs
            .remove_file(&self.lock_path())
            .map_err(|e| store_error("removing lock file", e))
    }

    fn current_lock(&self) -> Result<Option<LockRecord>> {
        let path = self.lock_path();
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let contents = self
            .fs
            .read_to_string(&path)
            .map_err(|e| store_error("reading lock file", e))?;
        match toml::from_str::<LockRecord>(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!(error = %e, "lock file is not a valid lock record");
                Ok(None)
            }
        }
    }
}
