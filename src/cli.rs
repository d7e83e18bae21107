// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `rulesched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rulesched",
    version,
    about = "Submit analysis jobs to a batch system as their rule conditions are met.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Rulesched.toml` in the current working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the persisted state and the scheduler lock.
    #[arg(long, value_name = "DIR", default_value = ".rulesched")]
    pub state_dir: PathBuf,

    /// Only run these goal analyses (repeatable).
    #[arg(long = "analysis", value_name = "LOGIC_NAME")]
    pub analyses: Vec<String>,

    /// Only walk input ids of these types (repeatable).
    #[arg(long = "input-id-type", value_name = "TYPE")]
    pub input_id_types: Vec<String>,

    /// Register input ids from a file before starting. One `<id> <type>`
    /// pair per line; blank lines and `#` comments are skipped.
    #[arg(long, value_name = "PATH")]
    pub input_id_file: Option<PathBuf>,

    /// Mark this analysis complete for every id read from `--input-id-file`.
    #[arg(long, value_name = "LOGIC_NAME", requires = "input_id_file")]
    pub seed_analysis: Option<String>,

    /// Run each job synchronously instead of through the batch backend.
    #[arg(long)]
    pub local: bool,

    /// Process input ids in random order.
    #[arg(long)]
    pub shuffle: bool,

    /// Run one full pass, wait for submitted jobs, and exit.
    #[arg(long)]
    pub once: bool,

    /// Keep a failed job's output files in place when it is retried.
    #[arg(long)]
    pub no_rename_on_retry: bool,

    /// Skip the rule sanity checks at start-up.
    #[arg(long)]
    pub skip_checks: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RULESCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the rules, but don't submit anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
