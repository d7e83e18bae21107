// src/job/lifecycle.rs

//! Create / retry / skip decisions for jobs, plus folding batch outcomes
//! and timeouts back into the job records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::dag::{Analysis, RuleSet};
use crate::errors::Result;
use crate::exec::{BatchBackend, JobOutcome, SubmitRequest};
use crate::fs::FileSystem;
use crate::job::{Job, JobId, JobStatus};
use crate::store::StateStore;
use crate::types::InputId;

/// Why a goal was handed to [`JobManager::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyReason {
    /// Every condition of the goal's rule is complete for the input id.
    RulesSatisfied,
    /// An accumulator stayed untainted for a full pass.
    AccumulatorComplete,
}

/// What reconciliation did for one (input id, analysis) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new job was created and submitted.
    Created(JobId),
    /// A failed job was moved to RETRIED and submitted again.
    Retried(JobId),
    /// A job whose earlier submission failed went through this time.
    Resubmitted(JobId),
    /// The job exists but the batch system refused it; it stays unsubmitted.
    SubmissionFailed(JobId),
    /// A failed job ran out of retries and is now FATAL.
    Escalated(JobId),
    /// A job is already in flight; nothing to do.
    AlreadyActive(JobId),
    /// A FATAL job blocks this pair until an operator intervenes.
    BlockedByFatal(JobId),
}

impl ReconcileOutcome {
    /// Whether this reconciliation put work into the batch system.
    pub fn submitted(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Created(_)
                | ReconcileOutcome::Retried(_)
                | ReconcileOutcome::Resubmitted(_)
        )
    }

    pub fn job_id(&self) -> JobId {
        match *self {
            ReconcileOutcome::Created(id)
            | ReconcileOutcome::Retried(id)
            | ReconcileOutcome::Resubmitted(id)
            | ReconcileOutcome::SubmissionFailed(id)
            | ReconcileOutcome::Escalated(id)
            | ReconcileOutcome::AlreadyActive(id)
            | ReconcileOutcome::BlockedByFatal(id) => id,
        }
    }
}

/// Owns every job state transition.
#[derive(Debug, Clone)]
pub struct JobManager {
    output_dir: PathBuf,
    rename_on_retry: bool,
    fs: Arc<dyn FileSystem>,
}

impl JobManager {
    pub fn new(output_dir: impl Into<PathBuf>, rename_on_retry: bool, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            output_dir: output_dir.into(),
            rename_on_retry,
            fs,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Make sure exactly the right thing happens for a goal that is ready on
    /// an input id. Safe to call on every pass: an in-flight job is left
    /// alone, so re-evaluating readiness never duplicates submissions.
    pub async fn reconcile<S, B>(
        &self,
        store: &mut S,
        backend: &mut B,
        input_id: &InputId,
        analysis: &Analysis,
        reason: ReadyReason,
    ) -> Result<ReconcileOutcome>
    where
        S: StateStore + ?Sized,
        B: BatchBackend + ?Sized,
    {
        let jobs: Vec<Job> = store
            .jobs_for(input_id)?
            .into_iter()
            .filter(|j| j.analysis == analysis.logic_name)
            .collect();

        if let Some(fatal) = jobs.iter().find(|j| j.status == JobStatus::Fatal) {
            debug!(
                job_id = fatal.id,
                analysis = %analysis.logic_name,
                input_id = %input_id,
                "FATAL job blocks this pair; skipping"
            );
            return Ok(ReconcileOutcome::BlockedByFatal(fatal.id));
        }

        let mut active: Vec<&Job> = jobs.iter().filter(|j| j.is_active()).collect();
        if active.len() > 1 {
            warn!(
                analysis = %analysis.logic_name,
                input_id = %input_id,
                count = active.len(),
                "more than one active job for pair; acting on the newest"
            );
        }
        active.sort_by_key(|j| j.id);

        let Some(existing) = active.last() else {
            return self.create_and_submit(store, backend, input_id, analysis, reason).await;
        };
        let job = (*existing).clone();

        if job.status.is_failure() {
            return self.retry_or_escalate(store, backend, job, analysis).await;
        }

        if job.status.awaits_submission() {
            debug!(
                job_id = job.id,
                status = %job.status,
                "job not yet accepted by batch system; submitting again"
            );
            let id = job.id;
            return Ok(if self.submit(store, backend, job, analysis).await? {
                ReconcileOutcome::Resubmitted(id)
            } else {
                ReconcileOutcome::SubmissionFailed(id)
            });
        }

        Ok(ReconcileOutcome::AlreadyActive(job.id))
    }

    async fn create_and_submit<S, B>(
        &self,
        store: &mut S,
        backend: &mut B,
        input_id: &InputId,
        analysis: &Analysis,
        reason: ReadyReason,
    ) -> Result<ReconcileOutcome>
    where
        S: StateStore + ?Sized,
        B: BatchBackend + ?Sized,
    {
        let id = store.next_job_id()?;
        let job = Job::new(id, analysis, input_id.clone(), &self.output_dir, Utc::now());
        store.upsert_job(&job)?;

        info!(
            job_id = id,
            analysis = %analysis.logic_name,
            input_id = %input_id,
            ?reason,
            "created job"
        );

        Ok(if self.submit(store, backend, job, analysis).await? {
            ReconcileOutcome::Created(id)
        } else {
            ReconcileOutcome::SubmissionFailed(id)
        })
    }

    async fn retry_or_escalate<S, B>(
        &self,
        store: &mut S,
        backend: &mut B,
        mut job: Job,
        analysis: &Analysis,
    ) -> Result<ReconcileOutcome>
    where
        S: StateStore + ?Sized,
        B: BatchBackend + ?Sized,
    {
        let now = Utc::now();

        if job.retry_count >= analysis.max_retries {
            let failed_as = job.status;
            job.transition(JobStatus::Fatal, now)?;
            store.upsert_job(&job)?;
            error!(
                job_id = job.id,
                analysis = %job.analysis,
                input_id = %job.input_id,
                retries = job.retry_count,
                last_status = %failed_as,
                "retries exhausted; job is FATAL and needs operator attention"
            );
            return Ok(ReconcileOutcome::Escalated(job.id));
        }

        if self.rename_on_retry {
            self.archive_artifacts(&job);
        }

        job.retry_count += 1;
        job.submission = None;
        job.transition(JobStatus::Retried, now)?;
        store.upsert_job(&job)?;

        info!(
            job_id = job.id,
            analysis = %job.analysis,
            input_id = %job.input_id,
            retry = job.retry_count,
            max_retries = analysis.max_retries,
            "retrying failed job"
        );

        let id = job.id;
        Ok(if self.submit(store, backend, job, analysis).await? {
            ReconcileOutcome::Retried(id)
        } else {
            ReconcileOutcome::SubmissionFailed(id)
        })
    }

    /// Hand a CREATED/RETRIED job to the backend. Returns `false` if the
    /// backend refused it; the job is then left as it was for a later pass.
    async fn submit<S, B>(
        &self,
        store: &mut S,
        backend: &mut B,
        mut job: Job,
        analysis: &Analysis,
    ) -> Result<bool>
    where
        S: StateStore + ?Sized,
        B: BatchBackend + ?Sized,
    {
        let request = SubmitRequest::new(&job, analysis);

        match backend.submit(request).await {
            Ok(handle) => {
                debug!(job_id = job.id, %handle, "job submitted");
                job.submission = Some(handle);
                job.transition(JobStatus::Submitted, Utc::now())?;
                store.upsert_job(&job)?;

                if backend.runs_synchronously() {
                    let outcomes = backend.collect_outcomes();
                    self.apply_outcomes(store, &outcomes)?;
                }
                Ok(true)
            }
            Err(e) => {
                warn!(
                    job_id = job.id,
                    analysis = %job.analysis,
                    input_id = %job.input_id,
                    error = %e,
                    "submission failed; will try again on a later pass"
                );
                Ok(false)
            }
        }
    }

    /// Rename a failed attempt's output files out of the way, since the batch
    /// system appends to whatever is already there.
    fn archive_artifacts(&self, job: &Job) {
        for path in [&job.stdout_file, &job.stderr_file] {
            if !self.fs.exists(path) {
                continue;
            }
            let mut archived = path.clone().into_os_string();
            archived.push(format!(".retry{}", job.retry_count));
            let archived = PathBuf::from(archived);

            match self.fs.rename(path, &archived) {
                Ok(()) => debug!(job_id = job.id, from = ?path, to = ?archived, "archived job output"),
                Err(e) => warn!(job_id = job.id, path = ?path, error = %e, "failed to archive job output"),
            }
        }
    }

    /// Fold status changes reported by the batch system into the store.
    ///
    /// SUCCESSFUL also records the completion that readiness evaluation
    /// looks at. Outcomes from an earlier attempt, and outcomes that are no
    /// longer legal for the job (e.g. a FAILED arriving after we recorded
    /// KILLED), are dropped.
    pub fn apply_outcomes<S>(&self, store: &mut S, outcomes: &[JobOutcome]) -> Result<usize>
    where
        S: StateStore + ?Sized,
    {
        let now = Utc::now();
        let mut applied = 0;

        for outcome in outcomes {
            let Some(mut job) = store.job(outcome.job_id)? else {
                warn!(job_id = outcome.job_id, "outcome for unknown job; ignoring");
                continue;
            };

            if outcome.attempt != job.retry_count {
                debug!(
                    job_id = job.id,
                    attempt = outcome.attempt,
                    current = job.retry_count,
                    status = %outcome.status,
                    "outcome from a superseded attempt; ignoring"
                );
                continue;
            }

            if job.status == outcome.status {
                continue;
            }

            if !job.status.can_transition_to(outcome.status) {
                debug!(
                    job_id = job.id,
                    from = %job.status,
                    to = %outcome.status,
                    "stale outcome; ignoring"
                );
                continue;
            }

            if outcome.status == JobStatus::Successful {
                store.record_completion(&job.input_id, &job.analysis)?;
            }

            job.transition(outcome.status, now)?;
            store.upsert_job(&job)?;
            applied += 1;

            match outcome.status {
                JobStatus::Successful => info!(
                    job_id = job.id,
                    analysis = %job.analysis,
                    input_id = %job.input_id,
                    "job successful"
                ),
                JobStatus::Failed => warn!(
                    job_id = job.id,
                    analysis = %job.analysis,
                    input_id = %job.input_id,
                    retry_count = job.retry_count,
                    "job failed"
                ),
                status => debug!(job_id = job.id, %status, "job status changed"),
            }
        }

        Ok(applied)
    }

    /// Kill in-flight jobs that have not changed status for longer than
    /// their analysis timeout. Returns the ids moved to KILLED.
    pub async fn check_timeouts<S, B>(
        &self,
        store: &mut S,
        backend: &mut B,
        rules: &RuleSet,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>>
    where
        S: StateStore + ?Sized,
        B: BatchBackend + ?Sized,
    {
        let mut killed = Vec::new();

        for mut job in store.unfinished_jobs()? {
            if !job.status.is_in_flight() {
                continue;
            }
            let Some(timeout) = rules.analysis(&job.analysis).and_then(|a| a.timeout) else {
                continue;
            };
            let elapsed = (now - job.last_status_change).to_std().unwrap_or_default();
            if elapsed <= timeout {
                continue;
            }

            warn!(
                job_id = job.id,
                analysis = %job.analysis,
                input_id = %job.input_id,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = timeout.as_secs(),
                "job timed out; killing"
            );

            if let Err(e) = backend.kill(job.id, job.submission.clone()).await {
                warn!(job_id = job.id, error = %e, "batch system refused kill");
            }

            job.transition(JobStatus::Killed, now)?;
            store.upsert_job(&job)?;
            killed.push(job.id);
        }

        Ok(killed)
    }

    /// After a restart, move in-flight jobs the backend no longer knows about
    /// to KILLED so they re-enter the retry path.
    pub fn recover_orphans<S, B>(&self, store: &mut S, backend: &B) -> Result<Vec<JobId>>
    where
        S: StateStore + ?Sized,
        B: BatchBackend + ?Sized,
    {
        let now = Utc::now();
        let mut recovered = Vec::new();

        for mut job in store.unfinished_jobs()? {
            if !job.status.is_in_flight() {
                continue;
            }
            let owned = job
                .submission
                .as_ref()
                .map(|h| backend.owns_handle(h))
                .unwrap_or(false);
            if owned {
                continue;
            }

            job.transition(JobStatus::Killed, now)?;
            store.upsert_job(&job)?;
            info!(
                job_id = job.id,
                analysis = %job.analysis,
                input_id = %job.input_id,
                "in-flight job from a previous run has no live submission; marked KILLED"
            );
            recovered.push(job.id);
        }

        Ok(recovered)
    }
}
