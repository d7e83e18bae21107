// src/exec/local.rs

//! "Local" execution: each job runs to completion inside `submit`.

use tracing::error;

use crate::exec::backend::{BackendFuture, BatchBackend, JobOutcome, SubmissionHandle, SubmitRequest};
use crate::exec::command::RunnerCommand;
use crate::exec::task_runner::{spawn_job_process, wait_for_job};
use crate::job::{JobId, JobStatus};

/// Synchronous backend: no queue, no concurrency, outcomes available as soon
/// as `submit` returns.
#[derive(Debug)]
pub struct LocalBackend {
    runner: RunnerCommand,
    finished: Vec<JobOutcome>,
}

impl LocalBackend {
    pub fn new(runner: RunnerCommand) -> Self {
        Self {
            runner,
            finished: Vec::new(),
        }
    }
}

impl BatchBackend for LocalBackend {
    fn submit(&mut self, request: SubmitRequest) -> BackendFuture<'_, SubmissionHandle> {
        Box::pin(async move {
            let command_line = self.runner.render(&request);
            let job_id = request.job_id;
            let attempt = request.attempt;

            let status = match spawn_job_process(&request, &command_line) {
                Ok(mut child) => wait_for_job(&request, &mut child).await.unwrap_or_else(|err| {
                    error!(job_id, error = %err, "job execution error");
                    JobStatus::Failed
                }),
                Err(err) => {
                    error!(job_id, error = %err, "job execution error");
                    JobStatus::Failed
                }
            };

            self.finished.push(JobOutcome::new(job_id, attempt, status));
            Ok(SubmissionHandle(format!("local-{job_id}")))
        })
    }

    fn pending_count(&mut self) -> BackendFuture<'_, usize> {
        Box::pin(async { Ok(0) })
    }

    fn kill(&mut self, _job_id: JobId, _handle: Option<SubmissionHandle>) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn flush_created(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn collect_outcomes(&mut self) -> Vec<JobOutcome> {
        std::mem::take(&mut self.finished)
    }

    fn owns_handle(&self, _handle: &SubmissionHandle) -> bool {
        // Nothing survives a restart in local mode.
        false
    }

    fn runs_synchronously(&self) -> bool {
        true
    }
}
