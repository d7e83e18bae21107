#![allow(dead_code)]

use std::collections::BTreeMap;

use rulesched::config::{AnalysisConfig, ConfigFile, ConfigSection, RawConfigFile};
use rulesched::dag::RuleSet;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                analysis: BTreeMap::new(),
            },
        }
    }

    pub fn with_analysis(mut self, name: &str, analysis: AnalysisConfig) -> Self {
        self.config.analysis.insert(name.to_string(), analysis);
        self
    }

    pub fn with_wakeup(mut self, wakeup: &str) -> Self {
        self.config.config.wakeup = wakeup.to_string();
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.config.config.max_pending = max_pending;
        self
    }

    pub fn with_runner(mut self, runner: &str) -> Self {
        self.config.config.runner = runner.to_string();
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.config.config.default_max_retries = retries;
        self
    }

    /// The unvalidated config, for tests that expect validation to fail.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    pub fn build_rules(self) -> RuleSet {
        RuleSet::from_config(&self.build())
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `AnalysisConfig`.
pub struct AnalysisConfigBuilder {
    analysis: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn new(input_id_type: &str) -> Self {
        Self {
            analysis: AnalysisConfig {
                input_id_type: input_id_type.to_string(),
                module: String::new(),
                parameters: String::new(),
                timeout: None,
                max_retries: None,
                conditions: vec![],
            },
        }
    }

    /// Shorthand for an analysis on the `ACCUMULATOR` pseudo-type.
    pub fn accumulator() -> Self {
        Self::new("ACCUMULATOR")
    }

    pub fn condition(mut self, name: &str) -> Self {
        self.analysis.conditions.push(name.to_string());
        self
    }

    pub fn module(mut self, module: &str) -> Self {
        self.analysis.module = module.to_string();
        self
    }

    pub fn parameters(mut self, parameters: &str) -> Self {
        self.analysis.parameters = parameters.to_string();
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.analysis.timeout = Some(timeout.to_string());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.analysis.max_retries = Some(retries);
        self
    }

    pub fn build(self) -> AnalysisConfig {
        self.analysis
    }
}

/// The two-step pipeline used throughout the tests:
/// `Submit -> RepeatMask -> Genscan`, all on `SLICE`.
pub fn repeatmask_genscan(max_retries: u32) -> ConfigFileBuilder {
    ConfigFileBuilder::new()
        .with_analysis("Submit", AnalysisConfigBuilder::new("SLICE").build())
        .with_analysis(
            "RepeatMask",
            AnalysisConfigBuilder::new("SLICE")
                .module("RepeatMasker")
                .condition("Submit")
                .max_retries(max_retries)
                .build(),
        )
        .with_analysis(
            "Genscan",
            AnalysisConfigBuilder::new("SLICE")
                .module("Genscan")
                .condition("RepeatMask")
                .max_retries(max_retries)
                .build(),
        )
}
