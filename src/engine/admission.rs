// src/engine/admission.rs

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::engine::control::ControlChannel;
use crate::errors::Result;
use crate::exec::BatchBackend;

/// Result of waiting for room in the batch system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Submissions may continue; carries the pending count last seen.
    Available(usize),
    /// Termination arrived while waiting.
    Interrupted,
}

/// Keeps the batch system from being flooded and decides when the slow
/// checks are due.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    wakeup: Duration,
    max_pending: usize,
    backpressure_sleep: Duration,
    last_slow_check: Option<Instant>,
}

impl AdmissionController {
    pub fn new(wakeup: Duration, max_pending: usize, backpressure_sleep: Duration) -> Self {
        Self {
            wakeup,
            max_pending,
            backpressure_sleep,
            last_slow_check: None,
        }
    }

    /// Due if the wakeup timer fired, or `wakeup` has passed since the last
    /// check (or there never was one).
    pub fn slow_check_due(&self, now: Instant, wakeup_signalled: bool) -> bool {
        wakeup_signalled
            || self
                .last_slow_check
                .map(|last| now.saturating_duration_since(last) >= self.wakeup)
                .unwrap_or(true)
    }

    pub fn mark_checked(&mut self, now: Instant) {
        self.last_slow_check = Some(now);
    }

    pub fn over_capacity(&self, pending: usize) -> bool {
        pending > self.max_pending
    }

    /// Block while the batch system holds more than `max_pending` jobs.
    pub async fn wait_for_capacity<B>(
        &self,
        backend: &mut B,
        control: &mut ControlChannel,
    ) -> Result<Capacity>
    where
        B: BatchBackend + ?Sized,
    {
        loop {
            let pending = backend.pending_count().await?;
            if !self.over_capacity(pending) {
                debug!(pending, max_pending = self.max_pending, "batch system has capacity");
                return Ok(Capacity::Available(pending));
            }

            info!(
                pending,
                max_pending = self.max_pending,
                sleep_secs = self.backpressure_sleep.as_secs(),
                "batch system full; waiting"
            );
            control.sleep(self.backpressure_sleep).await;
            control.poll();
            if control.terminate_requested() {
                return Ok(Capacity::Interrupted);
            }
        }
    }
}
