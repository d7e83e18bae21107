// src/exec/task_runner.rs

//! Individual job process runner.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::exec::backend::{JobOutcome, SubmitRequest};
use crate::job::JobStatus;

/// Open an artifact file for appending, creating its directory.
///
/// Batch systems append to existing output files; we do the same, which is
/// why a retried job's old output is renamed out of the way first.
fn open_append(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {:?} for append", path))
}

/// Spawn the runner command for one job with stdout/stderr going to the
/// job's artifact files.
pub fn spawn_job_process(request: &SubmitRequest, command_line: &str) -> Result<Child> {
    info!(
        job_id = request.job_id,
        analysis = %request.logic_name,
        input_id = %request.input_id,
        cmd = %command_line,
        "starting job process"
    );

    let stdout = open_append(&request.stdout_file)?;
    let stderr = open_append(&request.stderr_file)?;

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);

    cmd.spawn()
        .with_context(|| format!("spawning process for job {}", request.job_id))
}

/// Wait for a spawned job and map its exit status to a job status.
pub async fn wait_for_job(request: &SubmitRequest, child: &mut Child) -> Result<JobStatus> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of job {}", request.job_id))?;

    let code = status.code().unwrap_or(-1);
    info!(
        job_id = request.job_id,
        analysis = %request.logic_name,
        exit_code = code,
        success = status.success(),
        "job process exited"
    );

    Ok(if status.success() {
        JobStatus::Successful
    } else {
        JobStatus::Failed
    })
}

/// Run one job in the background, reporting `RUNNING` and then
/// `SUCCESSFUL`/`FAILED` on `outcome_tx`.
///
/// - If the cancel channel fires (timeout kill), the child is killed and
///   **no** final outcome is sent; the scheduler already recorded `KILLED`.
pub async fn run_job(
    request: SubmitRequest,
    command_line: String,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let job_id = request.job_id;
    let attempt = request.attempt;

    let mut child = match spawn_job_process(&request, &command_line) {
        Ok(child) => child,
        Err(err) => {
            error!(job_id, error = %err, "job execution error");
            let _ = outcome_tx.send(JobOutcome::new(job_id, attempt, JobStatus::Failed));
            return;
        }
    };

    let _ = outcome_tx.send(JobOutcome::new(job_id, attempt, JobStatus::Running));

    // Either the process exits on its own (normal case), or we receive a
    // kill request from timeout detection.
    tokio::select! {
        status_res = wait_for_job(&request, &mut child) => {
            let status = status_res.unwrap_or_else(|err| {
                error!(job_id, error = %err, "job execution error");
                JobStatus::Failed
            });
            let _ = outcome_tx.send(JobOutcome::new(job_id, attempt, status));
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(job_id, attempt, "kill requested for running job; killing process");
                    if let Err(e) = child.kill().await {
                        warn!(job_id, error = %e, "failed to kill job process");
                    }
                }
                Err(e) => {
                    debug!(job_id, error = %e, "cancel channel closed without explicit kill");
                    // Child will be killed on drop due to kill_on_drop(true).
                }
            }
        }
    }
}
