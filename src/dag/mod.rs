// src/dag/mod.rs

//! Rule graph and readiness evaluation.
//!
//! - [`rule_set`] holds analyses and the rules between them.
//! - [`store`] keeps the current rule snapshot and reloads it on request.
//! - [`accumulator`] tracks which global accumulator analyses are still
//!   blocked during a pass.
//! - [`readiness`] decides, per input id, which goals are ready to run.

pub mod accumulator;
pub mod readiness;
pub mod rule_set;
pub mod store;

pub use accumulator::AccumulatorCompletionMap;
pub use readiness::{AnalysisFilter, Readiness, ReadinessEvaluator};
pub use rule_set::{Analysis, Rule, RuleSet};
pub use store::{ConfigRuleSource, RuleSource, RuleStore, StaticRuleSource};
