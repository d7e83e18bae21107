// src/exec/backend.rs

//! Pluggable batch-submission abstraction.
//!
//! The scheduler talks to a `BatchBackend` instead of a concrete cluster
//! client. This makes it easy to swap in a fake backend in tests while
//! keeping the production implementations in [`super::process`] and
//! [`super::local`].
//!
//! Outcomes flow back through [`BatchBackend::collect_outcomes`]; the
//! scheduler folds them into the state store itself, so every job
//! transition is written by exactly one place.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::dag::Analysis;
use crate::errors::Result;
use crate::job::{Job, JobId, JobStatus};
use crate::types::InputId;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Opaque handle the batch system gave us for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionHandle(pub String);

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the runner needs to execute one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub job_id: JobId,
    /// The job's `retry_count` at submission. Outcomes carry it back so a
    /// report from a killed attempt is never applied to its retry.
    pub attempt: u32,
    pub input_id: InputId,
    pub logic_name: String,
    pub module: String,
    pub parameters: String,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
}

impl SubmitRequest {
    pub fn new(job: &Job, analysis: &Analysis) -> Self {
        Self {
            job_id: job.id,
            attempt: job.retry_count,
            input_id: job.input_id.clone(),
            logic_name: analysis.logic_name.clone(),
            module: analysis.module.clone(),
            parameters: analysis.parameters.clone(),
            stdout_file: job.stdout_file.clone(),
            stderr_file: job.stderr_file.clone(),
        }
    }
}

/// Status change reported by the batch system for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub attempt: u32,
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn new(job_id: JobId, attempt: u32, status: JobStatus) -> Self {
        Self {
            job_id,
            attempt,
            status,
        }
    }
}

/// Trait abstracting the external batch-execution system.
pub trait BatchBackend: Send {
    /// Hand a job to the batch system. The backend may buffer it until
    /// [`flush_created`](Self::flush_created).
    fn submit(&mut self, request: SubmitRequest) -> BackendFuture<'_, SubmissionHandle>;

    /// Number of jobs the batch system holds that have not finished yet.
    fn pending_count(&mut self) -> BackendFuture<'_, usize>;

    /// Ask the batch system to stop a job. No final outcome is reported for
    /// a killed attempt; the scheduler records `KILLED` itself. A later
    /// `submit` of the same job id must start a fresh attempt.
    fn kill(&mut self, job_id: JobId, handle: Option<SubmissionHandle>) -> BackendFuture<'_, ()>;

    /// Dispatch anything still buffered.
    fn flush_created(&mut self) -> BackendFuture<'_, ()>;

    /// Drain status changes observed since the last call.
    fn collect_outcomes(&mut self) -> Vec<JobOutcome>;

    /// Whether this backend still tracks the job behind `handle`. Used after a
    /// restart to spot jobs whose process is gone.
    fn owns_handle(&self, _handle: &SubmissionHandle) -> bool {
        true
    }

    /// Jobs finish inside `submit`; outcomes are available right after it.
    fn runs_synchronously(&self) -> bool {
        false
    }
}
