use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::ExecutionMode;

/// Configuration exactly as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// wakeup = "60s"
/// max_pending = 500
/// runner = "run_analysis --analysis {logic_name} --input-id {input_id}"
///
/// [analysis.RepeatMask]
/// input_id_type = "SLICE"
/// module = "RepeatMasker"
///
/// [analysis.Genscan]
/// input_id_type = "SLICE"
/// module = "Genscan"
/// conditions = ["RepeatMask"]
/// ```
///
/// All sections are optional at the deserialization level; validation then
/// insists on at least one analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Scheduler behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All analyses from `[analysis.<logic_name>]`.
    #[serde(default)]
    pub analysis: BTreeMap<String, AnalysisConfig>,
}

/// `[config]` section. Durations are kept as strings here and parsed into
/// [`Settings`] during validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Slow cadence: how often outcomes, timeouts and batch load are checked.
    #[serde(default = "default_wakeup")]
    pub wakeup: String,

    /// Sleep after a pass that submitted nothing.
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep: String,

    /// Sleep between pending-count polls while the batch system is full.
    #[serde(default = "default_backpressure_sleep")]
    pub backpressure_sleep: String,

    /// Poll interval while draining in-flight jobs at shutdown.
    #[serde(default = "default_drain_poll")]
    pub drain_poll: String,

    /// Ceiling on jobs pending in the batch system before admission blocks.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// How many submissions the batch backend buffers before dispatching.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Process input ids of each type in random order.
    #[serde(default)]
    pub shuffle: bool,

    /// Rename a failed job's stdout/stderr before it is retried.
    #[serde(default = "default_true")]
    pub rename_on_retry: bool,

    #[serde(default)]
    pub execution: ExecutionMode,

    /// Directory job stdout/stderr files are written under.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Command template used to run an analysis for one input id.
    ///
    /// Placeholders: `{job_id}`, `{input_id}`, `{input_id_type}`,
    /// `{logic_name}`, `{module}`, `{parameters}`.
    #[serde(default = "default_runner")]
    pub runner: String,

    /// Retry budget for analyses that don't set `max_retries`.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_wakeup() -> String {
    "60s".to_string()
}

fn default_idle_sleep() -> String {
    "180s".to_string()
}

fn default_backpressure_sleep() -> String {
    "30s".to_string()
}

fn default_drain_poll() -> String {
    "1s".to_string()
}

fn default_max_pending() -> usize {
    500
}

fn default_batch_size() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("rulesched-output")
}

fn default_runner() -> String {
    "run_analysis --analysis {logic_name} --input-id {input_id} --module {module} --parameters {parameters}"
        .to_string()
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            wakeup: default_wakeup(),
            idle_sleep: default_idle_sleep(),
            backpressure_sleep: default_backpressure_sleep(),
            drain_poll: default_drain_poll(),
            max_pending: default_max_pending(),
            batch_size: default_batch_size(),
            shuffle: false,
            rename_on_retry: default_true(),
            execution: ExecutionMode::default(),
            output_dir: default_output_dir(),
            runner: default_runner(),
            default_max_retries: default_max_retries(),
        }
    }
}

/// `[analysis.<logic_name>]` section.
///
/// An analysis with a non-empty `conditions` list is the goal of a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Type of input id this analysis runs on, or `"ACCUMULATOR"`.
    pub input_id_type: String,

    /// Opaque reference handed to the runner.
    #[serde(default)]
    pub module: String,

    /// Opaque parameter string handed to the runner.
    #[serde(default)]
    pub parameters: String,

    /// Maximum time a job may spend between status changes, e.g. `"2h"`.
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Analyses that must be complete before this one may run.
    #[serde(default)]
    pub conditions: Vec<String>,
}

impl AnalysisConfig {
    pub fn effective_max_retries(&self, default_max_retries: u32) -> u32 {
        self.max_retries.unwrap_or(default_max_retries)
    }
}

/// Parsed scheduler settings, derived from a validated [`ConfigSection`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub wakeup: Duration,
    pub idle_sleep: Duration,
    pub backpressure_sleep: Duration,
    pub drain_poll: Duration,
    pub max_pending: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub rename_on_retry: bool,
    pub execution: ExecutionMode,
    pub output_dir: PathBuf,
    pub runner: String,
    pub default_max_retries: u32,
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (see
/// `config::validate`), so holders can rely on referential integrity and
/// acyclicity of the rule graph.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub settings: Settings,
    pub analysis: BTreeMap<String, AnalysisConfig>,
    /// Per-analysis timeouts, parsed during validation.
    pub(crate) timeouts: BTreeMap<String, Duration>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        settings: Settings,
        analysis: BTreeMap<String, AnalysisConfig>,
        timeouts: BTreeMap<String, Duration>,
    ) -> Self {
        Self {
            settings,
            analysis,
            timeouts,
        }
    }

    pub fn timeout_of(&self, logic_name: &str) -> Option<Duration> {
        self.timeouts.get(logic_name).copied()
    }
}
