// src/dag/readiness.rs

//! Decides which goal analyses an input id is ready for.
//!
//! The evaluator is pure: it reads the rule snapshot, the completions of one
//! input id and the current [`AccumulatorCompletionMap`], and returns a
//! [`Readiness`] value. Folding the accumulator taints back into the map is
//! the caller's job.

use std::collections::BTreeSet;

use tracing::trace;

use crate::dag::accumulator::AccumulatorCompletionMap;
use crate::dag::rule_set::{Analysis, Rule, RuleSet};
use crate::types::InputId;

/// Operator-supplied allow-list of goal analyses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisFilter {
    allowed: BTreeSet<String>,
}

impl AnalysisFilter {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn is_allowed(&self, logic_name: &str) -> bool {
        self.allowed.contains(logic_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(|s| s.as_str())
    }
}

/// Outcome of evaluating one input id against the rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Goal analyses whose conditions are all met for this input id. Order
    /// carries no meaning.
    pub ready: Vec<Analysis>,
    /// Accumulators this input id keeps from being complete.
    pub tainted: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessEvaluator<'a> {
    rules: &'a RuleSet,
    filter: Option<&'a AnalysisFilter>,
}

impl<'a> ReadinessEvaluator<'a> {
    pub fn new(rules: &'a RuleSet, filter: Option<&'a AnalysisFilter>) -> Self {
        Self { rules, filter }
    }

    fn goal_allowed(&self, goal: &str) -> bool {
        self.filter.map(|f| f.is_allowed(goal)).unwrap_or(true)
    }

    /// Whether `rule` has a condition of the same type as `input_id`, i.e.
    /// whether this input id is part of what an accumulator goal waits for.
    fn has_condition_of_type(&self, rule: &Rule, input_id: &InputId) -> bool {
        self.rules
            .conditions_of(rule)
            .any(|c| c.input_id_type == input_id.id_type)
    }

    /// Every condition of `rule` has a completion for this input id; for
    /// accumulator-typed conditions the global flag stands in.
    pub fn conditions_met(
        &self,
        rule: &Rule,
        completed: &BTreeSet<String>,
        accumulators: &AccumulatorCompletionMap,
    ) -> bool {
        rule.conditions.iter().all(|name| match self.rules.analysis(name) {
            Some(cond) if cond.is_accumulator() => accumulators.is_completed(name),
            Some(_) => completed.contains(name),
            None => false,
        })
    }

    /// Evaluate every rule for one input id.
    pub fn evaluate(
        &self,
        input_id: &InputId,
        completed: &BTreeSet<String>,
        accumulators: &AccumulatorCompletionMap,
    ) -> Readiness {
        let mut readiness = Readiness::default();

        for rule in self.rules.rules() {
            let Some(goal) = self.rules.analysis(&rule.goal) else {
                continue;
            };

            if !self.goal_allowed(&goal.logic_name) {
                // Can never be satisfied in this run.
                if goal.is_accumulator() && self.has_condition_of_type(rule, input_id) {
                    readiness.tainted.push(goal.logic_name.clone());
                }
                continue;
            }

            let met = self.conditions_met(rule, completed, accumulators);

            if goal.is_accumulator() {
                if !met && self.has_condition_of_type(rule, input_id) {
                    readiness.tainted.push(goal.logic_name.clone());
                }
                continue;
            }

            if met
                && goal.input_id_type == input_id.id_type
                && !completed.contains(&goal.logic_name)
            {
                trace!(input_id = %input_id, goal = %goal.logic_name, rule = rule.id, "goal ready");
                readiness.ready.push(goal.clone());
            }
        }

        readiness
    }

    /// Accumulator goals that may run once the full pass is over.
    ///
    /// Eligible means: allowed by the filter, untainted, not yet complete, and
    /// every accumulator-typed condition already complete.
    pub fn eligible_accumulators(&self, accumulators: &AccumulatorCompletionMap) -> Vec<Analysis> {
        self.rules
            .accumulator_rules()
            .filter(|rule| self.goal_allowed(&rule.goal))
            .filter(|rule| accumulators.is_eligible(&rule.goal))
            .filter(|rule| {
                self.rules
                    .conditions_of(rule)
                    .filter(|c| c.is_accumulator())
                    .all(|c| accumulators.is_completed(&c.logic_name))
            })
            .filter_map(|rule| self.rules.analysis(&rule.goal).cloned())
            .collect()
    }
}
