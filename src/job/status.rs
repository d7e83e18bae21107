// src/job/status.rs

//! Job state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of one execution attempt.
///
/// ```text
/// CREATED -> SUBMITTED -> {READING|RUNNING|WRITING} -> SUCCESSFUL
///                                                  \-> FAILED | KILLED
/// FAILED|KILLED -> RETRIED -> SUBMITTED   (while retries remain)
/// FAILED|KILLED -> FATAL                  (retries exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Submitted,
    Reading,
    Running,
    Writing,
    Successful,
    Failed,
    Killed,
    Retried,
    Fatal,
}

impl JobStatus {
    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Successful | JobStatus::Fatal)
    }

    /// Handed to the batch system and not yet finished.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            JobStatus::Submitted | JobStatus::Reading | JobStatus::Running | JobStatus::Writing
        )
    }

    /// The attempt ended without success; eligible for retry or escalation.
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Killed)
    }

    /// Waiting for a (re)submission that has not gone through yet.
    pub fn awaits_submission(self) -> bool {
        matches!(self, JobStatus::Created | JobStatus::Retried)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Created, Submitted) => true,
            (Retried, Submitted) => true,
            (Submitted | Reading | Running | Writing, Reading | Running | Writing) => self != next,
            (Submitted | Reading | Running | Writing, Successful | Failed | Killed) => true,
            (Failed | Killed, Retried | Fatal) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Reading => "READING",
            JobStatus::Running => "RUNNING",
            JobStatus::Writing => "WRITING",
            JobStatus::Successful => "SUCCESSFUL",
            JobStatus::Failed => "FAILED",
            JobStatus::Killed => "KILLED",
            JobStatus::Retried => "RETRIED",
            JobStatus::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
