// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod store;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::default_config_path;
use crate::config::{ConfigFile, load_and_validate};
use crate::dag::{AnalysisFilter, ConfigRuleSource, RuleSet, RuleStore};
use crate::engine::control::{spawn_signal_forwarders, spawn_wakeup_timer};
use crate::engine::{Runtime, RuntimeOptions, Scheduler, SchedulerOptions, control_channel};
use crate::errors::SchedulerError;
use crate::exec::{BatchBackend, LocalBackend, ProcessBatchBackend, RunnerCommand};
use crate::fs::RealFileSystem;
use crate::job::JobManager;
use crate::store::{FileStateStore, StateStore, lock};
use crate::types::{ExecutionMode, InputId, InputIdType};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading, validation and sanity checks
/// - the rule store, state store and scheduler lock
/// - the batch backend (local or child processes)
/// - signal forwarding and the wakeup timer
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    if args.skip_checks {
        warn!("rule sanity checks skipped");
    }

    // Reloads go through the same source, so they get the same checks.
    let source = ConfigRuleSource::new(&config_path).with_sanity_checks(!args.skip_checks);
    let rules = RuleStore::load(source)?;
    let snapshot = rules.snapshot();
    let filter = analysis_filter(&args.analyses, &snapshot)?;

    if args.dry_run {
        print_dry_run(&cfg, &snapshot, filter.as_ref());
        return Ok(());
    }

    let mut store = FileStateStore::open(&args.state_dir)?;
    let token = lock::acquire(&mut store)?;

    let result = match seed_from_args(&mut store, &args, &snapshot) {
        Ok(()) => {
            let execution = if args.local {
                ExecutionMode::Local
            } else {
                cfg.settings.execution
            };
            let runner = RunnerCommand::new(cfg.settings.runner.clone());

            match execution {
                ExecutionMode::Local => {
                    run_with_backend(store, LocalBackend::new(runner), &cfg, &args, rules, filter).await
                }
                ExecutionMode::Batch => {
                    let backend = ProcessBatchBackend::new(runner, cfg.settings.batch_size);
                    run_with_backend(store, backend, &cfg, &args, rules, filter).await
                }
            }
        }
        Err(e) => (store, Err(e)),
    };

    let (mut store, outcome) = result;
    token.release(&mut store)?;
    outcome.map_err(Into::into)
}

/// Build the scheduler around `backend`, run it, and hand the store back so
/// the caller can release the lock whatever happened.
async fn run_with_backend<B: BatchBackend>(
    store: FileStateStore,
    backend: B,
    cfg: &ConfigFile,
    args: &CliArgs,
    rules: RuleStore,
    filter: Option<AnalysisFilter>,
) -> (FileStateStore, errors::Result<()>) {
    let mut options = SchedulerOptions::from_settings(&cfg.settings);
    options.shuffle |= args.shuffle;
    if !args.input_id_types.is_empty() {
        options.input_id_types = Some(
            args.input_id_types
                .iter()
                .map(|t| InputIdType::new(t.trim()))
                .collect(),
        );
    }

    let rename_on_retry = cfg.settings.rename_on_retry && !args.no_rename_on_retry;
    let jobs = JobManager::new(
        cfg.settings.output_dir.clone(),
        rename_on_retry,
        Arc::new(RealFileSystem),
    );

    let mut scheduler = Scheduler::new(store, backend, jobs, options, filter);
    if let Err(e) = scheduler.recover_orphans() {
        let (store, _) = scheduler.into_parts();
        return (store, Err(e));
    }

    let (control_tx, control) = control_channel();
    let mut background = spawn_signal_forwarders(control_tx.clone());
    background.push(spawn_wakeup_timer(control_tx, cfg.settings.wakeup));

    let runtime_options = RuntimeOptions::from_settings(&cfg.settings, args.once);
    let mut runtime = Runtime::new(scheduler, rules, control, runtime_options);
    let result = runtime.run().await;

    for handle in background {
        handle.abort();
    }

    let (store, _backend) = runtime.into_scheduler().into_parts();
    (store, result)
}

/// Turn `--analysis` flags into an allow-list, rejecting unknown names.
fn analysis_filter(names: &[String], rules: &RuleSet) -> errors::Result<Option<AnalysisFilter>> {
    if names.is_empty() {
        return Ok(None);
    }
    for name in names {
        if rules.analysis(name).is_none() {
            return Err(SchedulerError::UnknownAnalysis(name.clone()));
        }
    }
    let filter = AnalysisFilter::new(names.iter().cloned());
    info!(analyses = ?filter.names().collect::<Vec<_>>(), "restricting goals to selected analyses");
    Ok(Some(filter))
}

fn seed_from_args<S: StateStore + ?Sized>(
    store: &mut S,
    args: &CliArgs,
    rules: &RuleSet,
) -> errors::Result<()> {
    let Some(path) = &args.input_id_file else {
        return Ok(());
    };

    if let Some(name) = &args.seed_analysis {
        if rules.analysis(name).is_none() {
            return Err(SchedulerError::UnknownAnalysis(name.clone()));
        }
    }

    let ids = read_input_id_file(path)?;
    seed_input_ids(store, &ids, args.seed_analysis.as_deref())?;
    info!(count = ids.len(), path = %path.display(), "registered input ids");
    Ok(())
}

/// Parse an input id file: one `<id> <type>` pair per line. Blank lines and
/// lines starting with `#` are skipped.
pub fn read_input_id_file(path: &Path) -> errors::Result<Vec<InputId>> {
    let contents = std::fs::read_to_string(path)?;
    parse_input_ids(&contents)
}

pub fn parse_input_ids(contents: &str) -> errors::Result<Vec<InputId>> {
    let mut ids = Vec::new();

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let [id, id_type] = fields.as_slice() else {
            return Err(SchedulerError::ConfigError(format!(
                "input id file line {}: expected `<id> <type>`, got {line:?}",
                lineno + 1
            )));
        };
        ids.push(InputId::new(*id, *id_type));
    }

    Ok(ids)
}

/// Register input ids and optionally mark one analysis complete for each of
/// them, the usual way of bootstrapping a pipeline's first step.
pub fn seed_input_ids<S: StateStore + ?Sized>(
    store: &mut S,
    ids: &[InputId],
    seed_analysis: Option<&str>,
) -> errors::Result<()> {
    for id in ids {
        store.register_input_id(id)?;
        if let Some(name) = seed_analysis {
            store.record_completion(id, name)?;
        }
    }
    debug!(count = ids.len(), seed_analysis, "seeded input ids");
    Ok(())
}

/// Simple dry-run output: print settings, analyses and rules.
fn print_dry_run(cfg: &ConfigFile, rules: &RuleSet, filter: Option<&AnalysisFilter>) {
    let s = &cfg.settings;
    println!("rulesched dry-run");
    println!("  config.execution = {:?}", s.execution);
    println!("  config.wakeup = {:?}", s.wakeup);
    println!("  config.max_pending = {}", s.max_pending);
    println!("  config.batch_size = {}", s.batch_size);
    println!("  config.output_dir = {}", s.output_dir.display());
    println!("  config.runner = {}", s.runner);
    println!();

    println!("analyses ({}):", rules.analyses().count());
    for a in rules.analyses() {
        println!("  - {} [{}]", a.logic_name, a.input_id_type);
        println!("      module: {}", a.module);
        if !a.parameters.is_empty() {
            println!("      parameters: {}", a.parameters);
        }
        if let Some(timeout) = a.timeout {
            println!("      timeout: {timeout:?}");
        }
        println!("      max_retries: {}", a.max_retries);
    }
    println!();

    println!("rules ({}):", rules.rules().len());
    for rule in rules.rules() {
        let excluded = filter.map(|f| !f.is_allowed(&rule.goal)).unwrap_or(false);
        let marker = if excluded { " (excluded by --analysis)" } else { "" };
        println!("  {}: {} <- {:?}{marker}", rule.id, rule.goal, rule.conditions);
    }

    let types: Vec<String> = rules.input_id_types().iter().map(|t| t.to_string()).collect();
    println!();
    println!("input id types walked per pass: {types:?}");

    debug!("dry-run complete (no submission)");
}
