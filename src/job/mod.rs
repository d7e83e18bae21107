// src/job/mod.rs

//! Job records and their lifecycle.
//!
//! - [`status`] defines the per-job state machine.
//! - [`lifecycle`] owns create / retry / skip decisions, outcome folding and
//!   timeout detection.

pub mod lifecycle;
pub mod status;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::Analysis;
use crate::errors::{Result, SchedulerError};
use crate::exec::SubmissionHandle;
use crate::types::InputId;

pub use lifecycle::{JobManager, ReadyReason, ReconcileOutcome};
pub use status::JobStatus;

pub type JobId = u64;

/// One execution attempt of an analysis on an input id.
///
/// The record is persisted on creation and after every status change, so a
/// restarted scheduler resumes from it instead of re-deriving history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Logic name of the analysis.
    pub analysis: String,
    pub status: JobStatus,
    pub retry_count: u32,
    pub created: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionHandle>,
    pub input_id: InputId,
}

impl Job {
    pub fn new(
        id: JobId,
        analysis: &Analysis,
        input_id: InputId,
        output_dir: &Path,
        now: DateTime<Utc>,
    ) -> Self {
        let (stdout_file, stderr_file) = artifact_paths(output_dir, analysis, &input_id, id);
        Self {
            id,
            analysis: analysis.logic_name.clone(),
            status: JobStatus::Created,
            retry_count: 0,
            created: now,
            last_status_change: now,
            stdout_file,
            stderr_file,
            submission: None,
            input_id,
        }
    }

    /// A job blocks creation of another job for the same (input id, analysis)
    /// unless it is FATAL or SUCCESSFUL.
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Move to `next`, stamping the change time. Illegal moves are rejected
    /// and leave the job untouched.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                job: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.last_status_change = now;
        Ok(())
    }
}

/// `<output_dir>/<logic_name>/<input id>.<job id>.{out,err}`, with path
/// separators in the input id replaced.
fn artifact_paths(
    output_dir: &Path,
    analysis: &Analysis,
    input_id: &InputId,
    id: JobId,
) -> (PathBuf, PathBuf) {
    let safe: String = input_id
        .id
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '_' } else { c })
        .collect();
    let dir = output_dir.join(&analysis.logic_name);
    (
        dir.join(format!("{safe}.{id}.out")),
        dir.join(format!("{safe}.{id}.err")),
    )
}
