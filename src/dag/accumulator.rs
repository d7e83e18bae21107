// src/dag/accumulator.rs

use std::collections::BTreeSet;

use tracing::debug;

/// Per-pass view of accumulator analyses.
///
/// Rebuilt at the start of every full pass:
/// - `completed` is read from the state store (accumulators that already ran);
/// - `incomplete` starts empty and collects taints while the pass walks the
///   input ids. Taints are never cleared within a pass.
///
/// An accumulator is eligible only if it is in neither set once every
/// non-accumulator input id type has been walked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatorCompletionMap {
    incomplete: BTreeSet<String>,
    completed: BTreeSet<String>,
}

impl AccumulatorCompletionMap {
    pub fn new(completed: impl IntoIterator<Item = String>) -> Self {
        Self {
            incomplete: BTreeSet::new(),
            completed: completed.into_iter().collect(),
        }
    }

    /// Taint an accumulator for the rest of this pass.
    pub fn mark_incomplete(&mut self, logic_name: &str) {
        if self.incomplete.insert(logic_name.to_string()) {
            debug!(accumulator = %logic_name, "accumulator tainted for this pass");
        }
    }

    /// Fold the taints produced by one readiness evaluation into the map.
    pub fn absorb<'a>(&mut self, tainted: impl IntoIterator<Item = &'a String>) {
        for name in tainted {
            self.mark_incomplete(name);
        }
    }

    pub fn is_incomplete(&self, logic_name: &str) -> bool {
        self.incomplete.contains(logic_name)
    }

    /// Whether the accumulator already ran to completion (globally).
    pub fn is_completed(&self, logic_name: &str) -> bool {
        self.completed.contains(logic_name)
    }

    pub fn is_eligible(&self, logic_name: &str) -> bool {
        !self.is_incomplete(logic_name) && !self.is_completed(logic_name)
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &str> {
        self.incomplete.iter().map(|s| s.as_str())
    }
}
