// src/engine/core.rs

//! One full scheduling pass.
//!
//! A pass walks every selected input id type, evaluates readiness for each
//! input id, and hands ready goals to the [`JobManager`]. Once every type
//! has been walked, accumulators that nothing tainted are run. The
//! accumulator map is a value owned by the pass; nothing survives between
//! passes except what is in the state store.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::Utc;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::dag::{AccumulatorCompletionMap, AnalysisFilter, ReadinessEvaluator, RuleSet};
use crate::engine::admission::{AdmissionController, Capacity};
use crate::engine::control::ControlChannel;
use crate::engine::{PassSummary, SchedulerOptions};
use crate::errors::Result;
use crate::exec::BatchBackend;
use crate::job::{JobManager, ReadyReason};
use crate::store::StateStore;
use crate::types::{InputId, InputIdType};

/// Owns the state store and batch backend for the lifetime of the run.
///
/// All job writes go through here, from a single task.
pub struct Scheduler<S: StateStore, B: BatchBackend> {
    store: S,
    backend: B,
    jobs: JobManager,
    options: SchedulerOptions,
    filter: Option<AnalysisFilter>,
    admission: AdmissionController,
}

impl<S: StateStore, B: BatchBackend> std::fmt::Debug for Scheduler<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs)
            .field("options", &self.options)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl<S: StateStore, B: BatchBackend> Scheduler<S, B> {
    pub fn new(
        store: S,
        backend: B,
        jobs: JobManager,
        options: SchedulerOptions,
        filter: Option<AnalysisFilter>,
    ) -> Self {
        let admission =
            AdmissionController::new(options.wakeup, options.max_pending, options.backpressure_sleep);
        Self {
            store,
            backend,
            jobs,
            options,
            filter,
            admission,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.backend)
    }

    /// Mark in-flight jobs left over from an earlier run as KILLED.
    pub fn recover_orphans(&mut self) -> Result<usize> {
        let recovered = self.jobs.recover_orphans(&mut self.store, &self.backend)?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered orphaned jobs from previous run");
        }
        Ok(recovered.len())
    }

    /// Fold whatever the backend has reported since the last call.
    pub fn apply_backend_outcomes(&mut self) -> Result<usize> {
        let outcomes = self.backend.collect_outcomes();
        if outcomes.is_empty() {
            return Ok(0);
        }
        self.jobs.apply_outcomes(&mut self.store, &outcomes)
    }

    /// Types this pass walks, in a stable order.
    fn selected_types(&self, rules: &RuleSet) -> Vec<InputIdType> {
        let known = rules.input_id_types();
        match &self.options.input_id_types {
            None => known.into_iter().collect(),
            Some(wanted) => {
                for t in wanted.iter().filter(|t| !known.contains(*t)) {
                    warn!(input_id_type = %t, "requested input id type is not used by any rule");
                }
                known.into_iter().filter(|t| wanted.contains(t)).collect()
            }
        }
    }

    fn load_accumulator_map(&self, rules: &RuleSet) -> Result<AccumulatorCompletionMap> {
        let mut completed = Vec::new();
        for name in rules.accumulator_names() {
            if self.store.accumulator_completed(name)? {
                completed.push(name.to_string());
            }
        }
        Ok(AccumulatorCompletionMap::new(completed))
    }

    /// Outcomes, timeouts, then wait for room in the batch system.
    async fn slow_check(&mut self, rules: &RuleSet, control: &mut ControlChannel) -> Result<Capacity> {
        self.apply_backend_outcomes()?;

        let killed = self
            .jobs
            .check_timeouts(&mut self.store, &mut self.backend, rules, Utc::now())
            .await?;
        if !killed.is_empty() {
            info!(count = killed.len(), "killed timed-out jobs");
        }

        let capacity = self
            .admission
            .wait_for_capacity(&mut self.backend, control)
            .await?;
        self.admission.mark_checked(Instant::now());
        Ok(capacity)
    }

    /// One full pass over every selected input id type, then accumulators.
    pub async fn tick(&mut self, rules: &RuleSet, control: &mut ControlChannel) -> Result<PassSummary> {
        let mut summary = PassSummary::default();

        control.take_wakeup();
        if let Capacity::Interrupted = self.slow_check(rules, control).await? {
            summary.interrupted = true;
            return Ok(summary);
        }

        let filter = self.filter.clone();
        let evaluator = ReadinessEvaluator::new(rules, filter.as_ref());
        let mut accumulators = self.load_accumulator_map(rules)?;
        let mut processed: BTreeSet<InputIdType> = BTreeSet::new();

        'types: for id_type in self.selected_types(rules) {
            let mut ids = self.store.list_input_ids(&id_type)?;
            if self.options.shuffle {
                ids.shuffle(&mut rand::thread_rng());
            }
            debug!(input_id_type = %id_type, count = ids.len(), "walking input ids");

            for input_id in ids {
                control.poll();
                if control.terminate_requested() {
                    info!("stopping pass early on termination request");
                    summary.interrupted = true;
                    break 'types;
                }

                let wakeup = control.take_wakeup();
                if self.admission.slow_check_due(Instant::now(), wakeup) {
                    if let Capacity::Interrupted = self.slow_check(rules, control).await? {
                        summary.interrupted = true;
                        break 'types;
                    }
                }

                self.process_input_id(&evaluator, &input_id, &mut accumulators, &mut summary)
                    .await;
                summary.input_ids += 1;
            }

            processed.insert(id_type);
        }

        if !summary.interrupted {
            self.run_accumulators(rules, &evaluator, &mut accumulators, &processed, &mut summary)
                .await;
        }

        if let Err(e) = self.backend.flush_created().await {
            warn!(error = %e, "failed to flush buffered submissions");
        }

        Ok(summary)
    }

    async fn process_input_id(
        &mut self,
        evaluator: &ReadinessEvaluator<'_>,
        input_id: &InputId,
        accumulators: &mut AccumulatorCompletionMap,
        summary: &mut PassSummary,
    ) {
        let completed = match self.store.completed_analyses(input_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(input_id = %input_id, error = %e, "could not read completions; skipping input id");
                summary.errors += 1;
                return;
            }
        };

        let readiness = evaluator.evaluate(input_id, &completed, accumulators);
        accumulators.absorb(&readiness.tainted);

        for analysis in &readiness.ready {
            match self
                .jobs
                .reconcile(
                    &mut self.store,
                    &mut self.backend,
                    input_id,
                    analysis,
                    ReadyReason::RulesSatisfied,
                )
                .await
            {
                Ok(outcome) if outcome.submitted() => summary.submitted += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        input_id = %input_id,
                        analysis = %analysis.logic_name,
                        error = %e,
                        "failed to reconcile job; continuing"
                    );
                    summary.errors += 1;
                }
            }
        }
    }

    async fn run_accumulators(
        &mut self,
        rules: &RuleSet,
        evaluator: &ReadinessEvaluator<'_>,
        accumulators: &mut AccumulatorCompletionMap,
        processed: &BTreeSet<InputIdType>,
        summary: &mut PassSummary,
    ) {
        // An accumulator waiting on a type this pass skipped can't be known
        // complete.
        for rule in rules.accumulator_rules() {
            let skipped = rules
                .conditions_of(rule)
                .any(|c| !c.is_accumulator() && !processed.contains(&c.input_id_type));
            if skipped {
                accumulators.mark_incomplete(&rule.goal);
            }
        }

        let waiting: Vec<&str> = accumulators.incomplete().collect();
        if !waiting.is_empty() {
            debug!(?waiting, "accumulators still waiting on input ids");
        }

        let acc_id = InputId::accumulator();
        for analysis in evaluator.eligible_accumulators(accumulators) {
            match self
                .jobs
                .reconcile(
                    &mut self.store,
                    &mut self.backend,
                    &acc_id,
                    &analysis,
                    ReadyReason::AccumulatorComplete,
                )
                .await
            {
                Ok(outcome) if outcome.submitted() => summary.accumulators_submitted += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        analysis = %analysis.logic_name,
                        error = %e,
                        "failed to reconcile accumulator job; continuing"
                    );
                    summary.errors += 1;
                }
            }
        }
    }

    /// Wait for every job the backend still holds.
    ///
    /// Returns `false` if a further Terminate arrived and the drain was
    /// abandoned with jobs still in flight.
    pub async fn drain(&mut self, control: &mut ControlChannel, poll: std::time::Duration) -> Result<bool> {
        self.backend.flush_created().await?;
        let baseline = control.terminations();
        let mut announced = false;

        loop {
            let pending = self.backend.pending_count().await?;
            self.apply_backend_outcomes()?;
            if pending == 0 {
                debug!("no jobs in flight");
                return Ok(true);
            }

            if !announced {
                info!(pending, "waiting for in-flight jobs to finish");
                announced = true;
            }

            control.sleep(poll).await;
            control.poll();
            if control.terminations() > baseline {
                warn!(pending, "drain abandoned; jobs left in flight will be recovered on restart");
                return Ok(false);
            }
        }
    }
}
