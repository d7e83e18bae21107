// src/exec/mod.rs

//! Batch-submission layer.
//!
//! - [`backend`] provides the `BatchBackend` trait the scheduler talks to,
//!   plus the request/outcome types that cross it.
//! - [`command`] renders the runner command template for one job.
//! - [`task_runner`] spawns and waits on one job process.
//! - [`process`] is the default backend: buffered dispatch of child
//!   processes, polled for outcomes.
//! - [`local`] runs each job synchronously inside `submit`.

pub mod backend;
pub mod command;
pub mod local;
pub mod process;
pub mod task_runner;

pub use backend::{BackendFuture, BatchBackend, JobOutcome, SubmissionHandle, SubmitRequest};
pub use command::RunnerCommand;
pub use local::LocalBackend;
pub use process::ProcessBatchBackend;
