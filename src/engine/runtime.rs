// src/engine/runtime.rs

use std::fmt;

use tracing::{debug, error, info};

use crate::dag::RuleStore;
use crate::errors::Result;
use crate::exec::BatchBackend;
use crate::store::StateStore;

use super::control::ControlChannel;
use super::core::Scheduler;
use super::{PassSummary, RuntimeOptions};

/// Repeats scheduling passes until told to stop.
///
/// Between passes it handles rule reloads and termination, and sleeps when
/// a pass found nothing to submit. On the way out it drains in-flight jobs.
pub struct Runtime<S: StateStore, B: BatchBackend> {
    scheduler: Scheduler<S, B>,
    rules: RuleStore,
    control: ControlChannel,
    options: RuntimeOptions,
    passes: u64,
}

impl<S: StateStore, B: BatchBackend> fmt::Debug for Runtime<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("rules", &self.rules)
            .field("options", &self.options)
            .field("passes", &self.passes)
            .finish_non_exhaustive()
    }
}

impl<S: StateStore, B: BatchBackend> Runtime<S, B> {
    pub fn new(
        scheduler: Scheduler<S, B>,
        rules: RuleStore,
        control: ControlChannel,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            rules,
            control,
            options,
            passes: 0,
        }
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn into_scheduler(self) -> Scheduler<S, B> {
        self.scheduler
    }

    /// Main loop.
    ///
    /// A failed pass is logged and treated as idle; only a failure while
    /// draining is returned.
    pub async fn run(&mut self) -> Result<()> {
        info!(once = self.options.exit_after_pass, "rulesched runtime started");

        loop {
            self.control.poll();
            if self.control.terminate_requested() {
                break;
            }

            if self.control.take_reload() {
                // Failure keeps the previous snapshot and is already logged.
                let _ = self.rules.reload();
            }

            let rules = self.rules.snapshot();
            let summary = match self.scheduler.tick(&rules, &mut self.control).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "scheduling pass failed");
                    PassSummary::default()
                }
            };
            self.passes += 1;

            info!(
                pass = self.passes,
                input_ids = summary.input_ids,
                submitted = summary.submitted,
                accumulators = summary.accumulators_submitted,
                errors = summary.errors,
                "pass complete"
            );

            if self.options.exit_after_pass {
                info!("single pass requested; stopping");
                break;
            }
            if summary.interrupted || self.control.terminate_requested() {
                break;
            }

            if summary.is_idle() {
                debug!(sleep_secs = self.options.idle_sleep.as_secs(), "nothing submitted; sleeping");
                self.control.sleep(self.options.idle_sleep).await;
            }
        }

        let drained = self
            .scheduler
            .drain(&mut self.control, self.options.drain_poll)
            .await?;
        info!(drained, passes = self.passes, "runtime exiting");
        Ok(())
    }
}
