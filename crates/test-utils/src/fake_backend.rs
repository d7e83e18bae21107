use std::sync::{Arc, Mutex, MutexGuard};

use rulesched::errors::SchedulerError;
use rulesched::exec::{BackendFuture, BatchBackend, JobOutcome, SubmissionHandle, SubmitRequest};
use rulesched::job::{JobId, JobStatus};

/// Everything the fake backend has seen, plus what it has been told to do.
#[derive(Debug, Default)]
pub struct FakeBackendState {
    pub submitted: Vec<SubmitRequest>,
    pub killed: Vec<JobId>,
    /// Value reported by `pending_count`.
    pub pending: usize,
    /// Refuse this many upcoming submissions.
    pub fail_submissions: usize,
    /// If set, every accepted submission immediately queues this outcome.
    pub auto_outcome: Option<JobStatus>,
    pub queued: Vec<JobOutcome>,
    pub flushes: usize,
}

impl FakeBackendState {
    fn latest_attempt(&self, job_id: JobId) -> u32 {
        self.submitted
            .iter()
            .rev()
            .find(|r| r.job_id == job_id)
            .map(|r| r.attempt)
            .unwrap_or(0)
    }
}

/// A scripted batch backend:
/// - records submissions, kills and flushes;
/// - reports whatever outcomes the test queues (or `auto_outcome`).
///
/// Clones share state, so a test can keep one handle while the scheduler
/// owns the other.
#[derive(Debug, Clone, Default)]
pub struct FakeBatchBackend {
    state: Arc<Mutex<FakeBackendState>>,
    synchronous: bool,
}

impl FakeBatchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like the local backend: outcomes are applied right after submit.
    pub fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeBackendState> {
        self.state.lock().unwrap()
    }

    /// Queue an outcome for the most recently submitted attempt of `job_id`.
    pub fn push_outcome(&self, job_id: JobId, status: JobStatus) {
        let mut state = self.state();
        let attempt = state.latest_attempt(job_id);
        state.queued.push(JobOutcome::new(job_id, attempt, status));
    }

    pub fn push_outcome_for_attempt(&self, job_id: JobId, attempt: u32, status: JobStatus) {
        self.state().queued.push(JobOutcome::new(job_id, attempt, status));
    }

    pub fn set_pending(&self, pending: usize) {
        self.state().pending = pending;
    }

    pub fn fail_next_submissions(&self, count: usize) {
        self.state().fail_submissions = count;
    }

    pub fn complete_all_with(&self, status: JobStatus) {
        self.state().auto_outcome = Some(status);
    }

    /// `(job id, logic name, input id)` of every accepted submission, in order.
    pub fn submissions(&self) -> Vec<(JobId, String, String)> {
        self.state()
            .submitted
            .iter()
            .map(|r| (r.job_id, r.logic_name.clone(), r.input_id.id.clone()))
            .collect()
    }

    pub fn submission_count(&self) -> usize {
        self.state().submitted.len()
    }
}

impl BatchBackend for FakeBatchBackend {
    fn submit(&mut self, request: SubmitRequest) -> BackendFuture<'_, SubmissionHandle> {
        let result = {
            let mut state = self.state();
            if state.fail_submissions > 0 {
                state.fail_submissions -= 1;
                Err(SchedulerError::Submission {
                    job: request.job_id,
                    reason: "scripted failure".to_string(),
                })
            } else {
                let (job_id, attempt) = (request.job_id, request.attempt);
                state.submitted.push(request);
                if let Some(status) = state.auto_outcome {
                    state.queued.push(JobOutcome::new(job_id, attempt, status));
                }
                Ok(SubmissionHandle(format!("fake-{job_id}")))
            }
        };
        Box::pin(async move { result })
    }

    fn pending_count(&mut self) -> BackendFuture<'_, usize> {
        let pending = self.state().pending;
        Box::pin(async move { Ok(pending) })
    }

    fn kill(&mut self, job_id: JobId, _handle: Option<SubmissionHandle>) -> BackendFuture<'_, ()> {
        self.state().killed.push(job_id);
        Box::pin(async { Ok(()) })
    }

    fn flush_created(&mut self) -> BackendFuture<'_, ()> {
        self.state().flushes += 1;
        Box::pin(async { Ok(()) })
    }

    fn collect_outcomes(&mut self) -> Vec<JobOutcome> {
        std::mem::take(&mut self.state().queued)
    }

    fn owns_handle(&self, handle: &SubmissionHandle) -> bool {
        handle.0.starts_with("fake-")
    }

    fn runs_synchronously(&self) -> bool {
        self.synchronous
    }
}
