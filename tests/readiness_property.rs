// tests/readiness_property.rs

use std::collections::BTreeSet;

use proptest::prelude::*;
use rulesched::dag::{AccumulatorCompletionMap, Analysis, ReadinessEvaluator, Rule, RuleSet};
use rulesched::types::InputId;

// Acyclic by construction: analysis N may only depend on analyses 0..N-1.
fn rule_set_strategy(max_analyses: usize) -> impl Strategy<Value = RuleSet> {
    (2..=max_analyses).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n).prop_map(
            move |raw_deps| {
                let analyses: Vec<Analysis> = (0..n)
                    .map(|i| Analysis::new(i as u32 + 1, format!("a{i}"), "SLICE"))
                    .collect();

                let mut rules = Vec::new();
                for (i, potential) in raw_deps.into_iter().enumerate() {
                    if i == 0 {
                        continue;
                    }
                    let deps: BTreeSet<usize> = potential.into_iter().map(|d| d % i).collect();
                    if deps.is_empty() {
                        continue;
                    }
                    rules.push(Rule {
                        id: rules.len() as u32 + 1,
                        goal: format!("a{i}"),
                        conditions: deps.into_iter().map(|d| format!("a{d}")).collect(),
                    });
                }
                RuleSet::new(analyses, rules)
            },
        )
    })
}

fn names_from_mask(mask: u16, n: usize) -> BTreeSet<String> {
    (0..n).filter(|i| mask & (1 << i) != 0).map(|i| format!("a{i}")).collect()
}

proptest! {
    #[test]
    fn test_more_completions_never_unready_a_goal(
        rules in rule_set_strategy(10),
        a in any::<u16>(),
        b in any::<u16>(),
    ) {
        let n = rules.analyses().count();
        let smaller = names_from_mask(a, n);
        let larger: BTreeSet<String> = smaller.union(&names_from_mask(b, n)).cloned().collect();

        let acc = AccumulatorCompletionMap::default();
        let evaluator = ReadinessEvaluator::new(&rules, None);

        for rule in rules.rules() {
            if evaluator.conditions_met(rule, &smaller, &acc) {
                prop_assert!(evaluator.conditions_met(rule, &larger, &acc));
            }
        }

        let input_id = InputId::new("chr1", "SLICE");
        let ready_small = evaluator.evaluate(&input_id, &smaller, &acc).ready;
        let ready_large: BTreeSet<String> = evaluator
            .evaluate(&input_id, &larger, &acc)
            .ready
            .into_iter()
            .map(|a| a.logic_name)
            .collect();

        for goal in ready_small {
            if !larger.contains(&goal.logic_name) {
                prop_assert!(ready_large.contains(&goal.logic_name));
            }
        }
    }
}
