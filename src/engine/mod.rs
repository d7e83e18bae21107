// src/engine/mod.rs

//! Orchestration engine for rulesched.
//!
//! This module ties together:
//! - one full scheduling pass over every input id ([`core`]);
//! - batch-load admission and the slow check cadence ([`admission`]);
//! - the cooperative control channel fed by OS signals and the wakeup
//!   timer ([`control`]);
//! - the outer loop that repeats passes, reloads rules, sleeps when idle
//!   and drains at shutdown ([`runtime`]).

use std::time::Duration;

use crate::config::Settings;
use crate::types::InputIdType;

pub mod admission;
pub mod control;
pub mod core;
pub mod runtime;

pub use admission::{AdmissionController, Capacity};
pub use control::{ControlChannel, ControlMessage, control_channel};
pub use core::Scheduler;
pub use runtime::Runtime;

/// Knobs used by a single pass.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Slow cadence: outcomes, timeouts and batch load are checked at least
    /// this often during a pass.
    pub wakeup: Duration,
    pub max_pending: usize,
    pub backpressure_sleep: Duration,
    /// Walk the input ids of each type in random order.
    pub shuffle: bool,
    /// Restrict the pass to these input id types. `None` means every type
    /// the rule set knows about.
    pub input_id_types: Option<Vec<InputIdType>>,
}

impl SchedulerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            wakeup: settings.wakeup,
            max_pending: settings.max_pending,
            backpressure_sleep: settings.backpressure_sleep,
            shuffle: settings.shuffle,
            input_id_types: None,
        }
    }
}

/// Options for the outer loop around the passes.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Run one full pass, drain, and exit (used for `--once`).
    pub exit_after_pass: bool,
    /// Sleep after a pass that submitted nothing.
    pub idle_sleep: Duration,
    /// Poll interval while waiting for in-flight jobs at shutdown.
    pub drain_poll: Duration,
}

impl RuntimeOptions {
    pub fn from_settings(settings: &Settings, once: bool) -> Self {
        Self {
            exit_after_pass: once,
            idle_sleep: settings.idle_sleep,
            drain_poll: settings.drain_poll,
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub input_ids: usize,
    /// Jobs put into the batch system (new, retried or resubmitted).
    pub submitted: usize,
    pub accumulators_submitted: usize,
    /// Per-input-id or per-goal failures that were logged and skipped.
    pub errors: usize,
    /// The pass stopped early because termination was requested.
    pub interrupted: bool,
}

impl PassSummary {
    /// Nothing was submitted, so the next pass can wait a while.
    pub fn is_idle(&self) -> bool {
        self.submitted == 0 && self.accumulators_submitted == 0
    }
}
