use std::collections::BTreeMap;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, ConfigSection, RawConfigFile, Settings};
use crate::errors::{Result, SchedulerError};
use crate::types::{ACCUMULATOR, parse_duration};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SchedulerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let settings = parse_settings(&raw.config)?;
        let timeouts = parse_timeouts(&raw)?;
        Ok(ConfigFile::new_unchecked(settings, raw.analysis, timeouts))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_analyses(cfg)?;
    validate_global_config(&cfg.config)?;
    validate_analyses(cfg)?;
    validate_conditions(cfg)?;
    validate_rule_graph(cfg)?;
    Ok(())
}

fn ensure_has_analyses(cfg: &RawConfigFile) -> Result<()> {
    if cfg.analysis.is_empty() {
        return Err(SchedulerError::ConfigError(
            "config must contain at least one [analysis.<logic_name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &ConfigSection) -> Result<()> {
    if cfg.max_pending == 0 {
        return Err(SchedulerError::ConfigError(
            "[config].max_pending must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.batch_size == 0 {
        return Err(SchedulerError::ConfigError(
            "[config].batch_size must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.runner.trim().is_empty() {
        return Err(SchedulerError::ConfigError(
            "[config].runner must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_analyses(cfg: &RawConfigFile) -> Result<()> {
    for (name, analysis) in cfg.analysis.iter() {
        if analysis.input_id_type.trim().is_empty() {
            return Err(SchedulerError::ConfigError(format!(
                "analysis '{}' has an empty input_id_type",
                name
            )));
        }
    }
    Ok(())
}

fn validate_conditions(cfg: &RawConfigFile) -> Result<()> {
    for (name, analysis) in cfg.analysis.iter() {
        for cond in analysis.conditions.iter() {
            if !cfg.analysis.contains_key(cond) {
                return Err(SchedulerError::ConfigError(format!(
                    "analysis '{}' has unknown condition '{}' in `conditions`",
                    name, cond
                )));
            }
            if cond == name {
                return Err(SchedulerError::ConfigError(format!(
                    "analysis '{}' cannot be a condition of itself",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_rule_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: condition -> goal.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.analysis.keys() {
        graph.add_node(name.as_str());
    }

    for (name, analysis) in cfg.analysis.iter() {
        for cond in analysis.conditions.iter() {
            graph.add_edge(cond.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SchedulerError::RuleCycle(format!(
            "cycle detected in rule graph involving analysis '{}'",
            cycle.node_id()
        ))),
    }
}

fn parse_setting(field: &str, value: &str) -> Result<Duration> {
    let d = parse_duration(value)
        .map_err(|e| SchedulerError::ConfigError(format!("[config].{field}: {e}")))?;
    if d.is_zero() && field == "wakeup" {
        return Err(SchedulerError::ConfigError(
            "[config].wakeup must be greater than zero".to_string(),
        ));
    }
    Ok(d)
}

fn parse_settings(cfg: &ConfigSection) -> Result<Settings> {
    Ok(Settings {
        wakeup: parse_setting("wakeup", &cfg.wakeup)?,
        idle_sleep: parse_setting("idle_sleep", &cfg.idle_sleep)?,
        backpressure_sleep: parse_setting("backpressure_sleep", &cfg.backpressure_sleep)?,
        drain_poll: parse_setting("drain_poll", &cfg.drain_poll)?,
        max_pending: cfg.max_pending,
        batch_size: cfg.batch_size,
        shuffle: cfg.shuffle,
        rename_on_retry: cfg.rename_on_retry,
        execution: cfg.execution,
        output_dir: cfg.output_dir.clone(),
        runner: cfg.runner.clone(),
        default_max_retries: cfg.default_max_retries,
    })
}

fn parse_timeouts(cfg: &RawConfigFile) -> Result<BTreeMap<String, Duration>> {
    let mut timeouts = BTreeMap::new();
    for (name, analysis) in cfg.analysis.iter() {
        if let Some(ref raw) = analysis.timeout {
            let d = parse_duration(raw).map_err(|e| {
                SchedulerError::ConfigError(format!("analysis '{}' timeout: {}", name, e))
            })?;
            timeouts.insert(name.clone(), d);
        }
    }
    Ok(timeouts)
}

/// Optional checks run at start-up unless the operator skips them.
///
/// - an accumulator analysis without conditions is never the goal of a rule
///   and so would silently never run;
/// - a per-input-id goal can only be satisfied by conditions of its own
///   input id type or accumulators, since completions are recorded per
///   input id.
pub fn sanity_check(cfg: &ConfigFile) -> Result<()> {
    for (name, analysis) in cfg.analysis.iter() {
        if analysis.input_id_type == ACCUMULATOR && analysis.conditions.is_empty() {
            return Err(SchedulerError::SanityCheck(format!(
                "accumulator analysis '{}' has no conditions",
                name
            )));
        }
    }

    for (name, analysis) in cfg.analysis.iter() {
        if analysis.input_id_type == ACCUMULATOR {
            continue;
        }
        for cond in analysis.conditions.iter() {
            let Some(cond_cfg) = cfg.analysis.get(cond) else {
                return Err(SchedulerError::UnknownAnalysis(cond.clone()));
            };
            if cond_cfg.input_id_type != ACCUMULATOR
                && cond_cfg.input_id_type != analysis.input_id_type
            {
                return Err(SchedulerError::SanityCheck(format!(
                    "analysis '{}' ({}) can never run: condition '{}' has input_id_type {}",
                    name, analysis.input_id_type, cond, cond_cfg.input_id_type
                )));
            }
        }
    }

    Ok(())
}
