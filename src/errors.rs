// src/errors.rs

//! Crate-wide error aliases and helpers.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{JobId, JobStatus};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Sanity check failed: {0}")]
    SanityCheck(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Analysis not found: {0}")]
    UnknownAnalysis(String),

    #[error("Cycle detected in rule graph: {0}")]
    RuleCycle(String),

    #[error(
        "scheduler already running: lock held by {owner}@{host} (pid {pid}) since {since}; \
         if that process is gone, remove the lock record manually and restart"
    )]
    AlreadyLocked {
        owner: String,
        host: String,
        pid: u32,
        since: DateTime<Utc>,
    },

    #[error("Job {job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Submission failed for job {job}: {reason}")]
    Submission { job: JobId, reason: String },

    #[error("State store error: {0}")]
    Store(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedulerError>;
