// src/lib.rs

pub mod batch;
pub mod cli;
pub mod config;
pub mod errors;
pub mod events;
pub mod exec;
pub mod logging;
pub mod progress;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Datelike;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::{run_batch, ProgressSink};
use crate::cli::{CliArgs, Period};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::runner::{AgentQueryRunner, RunnerConfig};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - question normalization
/// - Ctrl-C → cancellation token
/// - the batch pool and its progress sink
/// - report rendering
///
/// Returns whether the batch as a whole succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let cfg = load_and_validate(&args.config)?;

    let questions = normalize_questions(&args.questions);

    if args.dry_run {
        print_dry_run(&cfg, &args, &questions);
        return Ok(true);
    }

    if questions.is_empty() {
        return Err(anyhow!("no non-blank questions given"));
    }

    let runner_cfg = resolve_runner_config(&cfg, &args)?;
    let requested_parallelism = args.parallel.unwrap_or(cfg.defaults.parallel);

    // Ctrl-C → cooperative cancellation through every layer.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("interrupt received; cancelling batch");
            cancel.cancel();
        });
    }

    // Status lines go to stderr; stdout carries only the final report.
    let sink: ProgressSink = Arc::new(|status: &str| {
        eprintln!("{status}");
        eprintln!();
    });

    let runner = Arc::new(AgentQueryRunner::new(runner_cfg));
    let outcome = run_batch(
        questions,
        requested_parallelism,
        runner,
        cancel,
        Some(sink),
    )
    .await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("serializing batch details")?
        );
    } else {
        println!("{}", outcome.report);
    }

    debug!(ok = outcome.ok, "batch finished");
    Ok(outcome.ok)
}

/// Trim and drop blank questions, preserving order.
fn normalize_questions(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Merge config-file defaults with CLI overrides into the per-run settings.
fn resolve_runner_config(cfg: &ConfigFile, args: &CliArgs) -> Result<RunnerConfig> {
    let period = match args.period {
        Some(p) => p,
        None => Period::from_config_str(&cfg.defaults.period)
            .ok_or_else(|| anyhow!("invalid period in config: {}", cfg.defaults.period))?,
    };

    let year = args
        .year
        .or(cfg.defaults.year)
        .unwrap_or_else(|| chrono::Utc::now().year());

    let model = args.model.clone().or_else(|| cfg.defaults.model.clone());

    let command_pattern = Regex::new(&cfg.agent.command_pattern)
        .context("invalid [agent].command_pattern regex")?;

    Ok(RunnerConfig {
        agent_bin: cfg.agent.bin.clone(),
        command_pattern,
        period,
        year,
        model,
        timeout: Duration::from_secs(cfg.defaults.effective_timeout_secs(args.timeout_secs)),
        max_sources: cfg.defaults.effective_max_sources(args.max_sources),
        reject_command_events: cfg.defaults.reject_command_events && !args.allow_command_events,
    })
}

/// Simple dry-run output: print questions and resolved settings.
fn print_dry_run(cfg: &ConfigFile, args: &CliArgs, questions: &[String]) {
    println!("scoutbatch dry-run");
    println!("  agent.bin = {}", cfg.agent.bin);
    println!("  agent.command_pattern = {}", cfg.agent.command_pattern);
    println!(
        "  timeout_secs = {}",
        cfg.defaults.effective_timeout_secs(args.timeout_secs)
    );
    println!(
        "  parallel (requested) = {}",
        args.parallel.unwrap_or(cfg.defaults.parallel)
    );
    println!(
        "  max_sources = {}",
        cfg.defaults.effective_max_sources(args.max_sources)
    );
    println!(
        "  reject_command_events = {}",
        cfg.defaults.reject_command_events && !args.allow_command_events
    );
    println!();

    println!("questions ({}):", questions.len());
    for (i, q) in questions.iter().enumerate() {
        println!("  {}. {q}", i + 1);
    }

    debug!("dry-run complete (no execution)");
}
