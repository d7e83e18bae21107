// src/dag/store.rs

//! Read-only rule snapshots and their reload policy.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{load_and_validate, sanity_check};
use crate::dag::rule_set::RuleSet;
use crate::errors::Result;

/// Where a rule snapshot comes from.
pub trait RuleSource: Send {
    fn load(&self) -> Result<RuleSet>;
}

/// Re-reads and re-validates the TOML config on every load, running the
/// sanity checks too unless they were turned off.
#[derive(Debug, Clone)]
pub struct ConfigRuleSource {
    path: PathBuf,
    sanity_checks: bool,
}

impl ConfigRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sanity_checks: true,
        }
    }

    pub fn with_sanity_checks(mut self, enabled: bool) -> Self {
        self.sanity_checks = enabled;
        self
    }
}

impl RuleSource for ConfigRuleSource {
    fn load(&self) -> Result<RuleSet> {
        let cfg = load_and_validate(&self.path)?;
        if self.sanity_checks {
            sanity_check(&cfg)?;
        }
        Ok(RuleSet::from_config(&cfg))
    }
}

/// A fixed rule set; reloading yields the same snapshot again.
#[derive(Debug, Clone)]
pub struct StaticRuleSource(pub RuleSet);

impl RuleSource for StaticRuleSource {
    fn load(&self) -> Result<RuleSet> {
        Ok(self.0.clone())
    }
}

/// Holds the current rule snapshot.
///
/// A reload builds a complete new [`RuleSet`] and swaps the `Arc`; a pass
/// that already holds the old snapshot keeps evaluating against it, so no
/// evaluation ever sees a half-updated rule set.
pub struct RuleStore {
    source: Box<dyn RuleSource>,
    snapshot: Arc<RuleSet>,
}

impl RuleStore {
    pub fn load(source: impl RuleSource + 'static) -> Result<Self> {
        let snapshot = Arc::new(source.load()?);
        info!(
            rules = snapshot.rules().len(),
            analyses = snapshot.analyses().count(),
            "rule store loaded"
        );
        Ok(Self {
            source: Box::new(source),
            snapshot,
        })
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.snapshot)
    }

    /// Replace the snapshot with a fresh load from the source.
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// returned to the caller.
    pub fn reload(&mut self) -> Result<()> {
        match self.source.load() {
            Ok(fresh) => {
                info!(
                    rules = fresh.rules().len(),
                    analyses = fresh.analyses().count(),
                    "rule store reloaded"
                );
                self.snapshot = Arc::new(fresh);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "rule reload failed; keeping previous rule set");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore")
            .field("snapshot", &self.snapshot)
            .finish_non_exhaustive()
    }
}
