// src/dag/rule_set.rs

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::config::model::ConfigFile;
use crate::types::InputIdType;

/// Immutable descriptor of a kind of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub id: u32,
    pub logic_name: String,
    pub input_id_type: InputIdType,
    /// Opaque reference resolved by the analysis runner.
    pub module: String,
    /// Opaque parameter string resolved by the analysis runner.
    pub parameters: String,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
}

impl Analysis {
    pub fn new(id: u32, logic_name: impl Into<String>, input_id_type: impl Into<InputIdType>) -> Self {
        let logic_name = logic_name.into();
        Self {
            id,
            module: logic_name.clone(),
            logic_name,
            input_id_type: input_id_type.into(),
            parameters: String::new(),
            timeout: None,
            max_retries: 3,
        }
    }

    pub fn is_accumulator(&self) -> bool {
        self.input_id_type.is_accumulator()
    }
}

/// "`goal` requires every analysis in `conditions` to be complete first."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: u32,
    pub goal: String,
    pub conditions: Vec<String>,
}

/// Snapshot of all analyses and the rules between them.
///
/// We already validate referential integrity and acyclicity in
/// `config::validate`; lookups here still tolerate missing names so a
/// hand-built set can't panic the scheduler.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    analyses: BTreeMap<String, Analysis>,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(analyses: impl IntoIterator<Item = Analysis>, rules: Vec<Rule>) -> Self {
        let analyses = analyses
            .into_iter()
            .map(|a| (a.logic_name.clone(), a))
            .collect();
        Self { analyses, rules }
    }

    /// Build a rule set from a validated [`ConfigFile`].
    ///
    /// Every analysis with a non-empty `conditions` list becomes the goal of
    /// one rule. Ids follow logic-name order, starting at 1.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut analyses = Vec::new();
        let mut rules = Vec::new();
        let default_retries = cfg.settings.default_max_retries;

        for (idx, (name, ac)) in cfg.analysis.iter().enumerate() {
            let id = (idx + 1) as u32;
            analyses.push(Analysis {
                id,
                logic_name: name.clone(),
                input_id_type: InputIdType::new(ac.input_id_type.trim()),
                module: ac.module.clone(),
                parameters: ac.parameters.clone(),
                timeout: cfg.timeout_of(name),
                max_retries: ac.effective_max_retries(default_retries),
            });

            if !ac.conditions.is_empty() {
                rules.push(Rule {
                    id: rules.len() as u32 + 1,
                    goal: name.clone(),
                    conditions: ac.conditions.clone(),
                });
            }
        }

        Self::new(analyses, rules)
    }

    pub fn analysis(&self, logic_name: &str) -> Option<&Analysis> {
        self.analyses.get(logic_name)
    }

    pub fn analyses(&self) -> impl Iterator<Item = &Analysis> {
        self.analyses.values()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Resolved condition analyses of a rule, skipping unknown names.
    pub fn conditions_of<'a>(&'a self, rule: &'a Rule) -> impl Iterator<Item = &'a Analysis> + 'a {
        rule.conditions.iter().filter_map(|c| self.analyses.get(c))
    }

    /// Rules whose goal is an accumulator analysis.
    pub fn accumulator_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| {
            self.analysis(&r.goal)
                .map(|a| a.is_accumulator())
                .unwrap_or(false)
        })
    }

    /// Every accumulator analysis known to the set, goal or not.
    pub fn accumulator_names(&self) -> impl Iterator<Item = &str> {
        self.analyses
            .values()
            .filter(|a| a.is_accumulator())
            .map(|a| a.logic_name.as_str())
    }

    /// Non-accumulator input id types that some rule cares about: the types
    /// of per-input-id goals plus the condition types of accumulator rules.
    ///
    /// These are the types a full pass iterates over.
    pub fn input_id_types(&self) -> BTreeSet<InputIdType> {
        let mut types = BTreeSet::new();
        for rule in &self.rules {
            let Some(goal) = self.analysis(&rule.goal) else {
                continue;
            };
            if goal.is_accumulator() {
                types.extend(
                    self.conditions_of(rule)
                        .filter(|c| !c.is_accumulator())
                        .map(|c| c.input_id_type.clone()),
                );
            } else {
                types.insert(goal.input_id_type.clone());
            }
        }
        types
    }
}
