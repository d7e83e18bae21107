// src/exec/process.rs

//! Batch backend that runs each job as a child process of the scheduler.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::exec::backend::{BackendFuture, BatchBackend, JobOutcome, SubmissionHandle, SubmitRequest};
use crate::exec::command::RunnerCommand;
use crate::exec::task_runner::run_job;
use crate::job::JobId;

const HANDLE_PREFIX: &str = "proc-";

/// Internal handle for a currently-running job process.
///
/// - `attempt` is the retry count the process was started for.
/// - `cancel` is used to request that the process be stopped (timeouts).
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveJob {
    attempt: u32,
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl ActiveJob {
    fn stop(mut self, job_id: JobId) {
        match self.cancel.take() {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(job_id, attempt = self.attempt, "job process already finished while killing");
                }
            }
            None => debug!(job_id, attempt = self.attempt, "kill already requested"),
        }
    }
}

/// Runs jobs as local child processes, `batch_size` at a time.
///
/// Submissions are buffered and only spawned once the buffer reaches
/// `batch_size` or [`flush_created`](BatchBackend::flush_created) is called.
/// **Per job id there is never more than one live attempt.** A killed
/// attempt is forgotten immediately; it may take a moment to exit, but its
/// late reports carry the old attempt number.
pub struct ProcessBatchBackend {
    runner: RunnerCommand,
    batch_size: usize,
    buffered: Vec<SubmitRequest>,
    active: HashMap<JobId, ActiveJob>,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<JobOutcome>,
}

impl ProcessBatchBackend {
    pub fn new(runner: RunnerCommand, batch_size: usize) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            runner,
            batch_size: batch_size.max(1),
            buffered: Vec::new(),
            active: HashMap::new(),
            outcome_tx,
            outcome_rx,
        }
    }

    fn handle_for(request: &SubmitRequest) -> SubmissionHandle {
        SubmissionHandle(format!(
            "{HANDLE_PREFIX}{}-{}-{}",
            std::process::id(),
            request.job_id,
            request.attempt
        ))
    }

    fn dispatch_buffered(&mut self) {
        if self.buffered.is_empty() {
            return;
        }
        info!(count = self.buffered.len(), "dispatching buffered jobs");

        for request in std::mem::take(&mut self.buffered) {
            let job_id = request.job_id;

            if let Some(existing) = self.active.get(&job_id) {
                if !existing.handle.is_finished() && existing.attempt == request.attempt {
                    debug!(
                        job_id,
                        attempt = request.attempt,
                        "attempt already has a live process; ignoring duplicate dispatch"
                    );
                    continue;
                }
            }
            // A newer attempt supersedes whatever is left of an older one.
            if let Some(previous) = self.active.remove(&job_id) {
                if !previous.handle.is_finished() {
                    warn!(
                        job_id,
                        previous = previous.attempt,
                        attempt = request.attempt,
                        "stopping superseded attempt"
                    );
                }
                previous.stop(job_id);
            }

            let attempt = request.attempt;
            let command_line = self.runner.render(&request);
            let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
            let tx = self.outcome_tx.clone();

            let handle = tokio::spawn(async move {
                run_job(request, command_line, tx, cancel_rx).await;
                debug!(job_id, attempt, "job runner future finished");
            });

            self.active.insert(
                job_id,
                ActiveJob {
                    attempt,
                    cancel: Some(cancel_tx),
                    handle,
                },
            );
        }
    }

    fn prune_finished(&mut self) {
        self.active.retain(|_, job| !job.handle.is_finished());
    }
}

impl BatchBackend for ProcessBatchBackend {
    fn submit(&mut self, request: SubmitRequest) -> BackendFuture<'_, SubmissionHandle> {
        Box::pin(async move {
            let handle = Self::handle_for(&request);
            debug!(job_id = request.job_id, %handle, "job buffered for dispatch");
            self.buffered.push(request);
            if self.buffered.len() >= self.batch_size {
                self.dispatch_buffered();
            }
            Ok(handle)
        })
    }

    fn pending_count(&mut self) -> BackendFuture<'_, usize> {
        Box::pin(async move {
            self.prune_finished();
            Ok(self.buffered.len() + self.active.len())
        })
    }

    fn kill(&mut self, job_id: JobId, _handle: Option<SubmissionHandle>) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.buffered.retain(|r| r.job_id != job_id);

            match self.active.remove(&job_id) {
                Some(job) => job.stop(job_id),
                None => debug!(job_id, "no live process to kill"),
            }
            Ok(())
        })
    }

    fn flush_created(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.dispatch_buffered();
            Ok(())
        })
    }

    fn collect_outcomes(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }

    fn owns_handle(&self, handle: &SubmissionHandle) -> bool {
        // Handles embed our pid; anything else came from a previous process.
        let ours = format!("{HANDLE_PREFIX}{}-", std::process::id());
        handle.0.starts_with(&ours)
    }
}
