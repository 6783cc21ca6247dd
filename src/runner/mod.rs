// src/runner/mod.rs

//! Single-query runner: composes prompt construction, the subprocess
//! lifecycle manager, final-artifact reading, structural validation, and
//! policy enforcement into one query's complete outcome.
//!
//! A run never returns an error: every failure mode becomes a structured
//! [`RunOutcome`] with a stable [`FailureReason`] code.

pub mod artifacts;
pub mod prompt;
pub mod result;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::Period;
use crate::events::{EventStreamParser, Telemetry};
use crate::exec::{run_agent, AgentInvocation, ExitKind};
use crate::progress::ProgressCounters;
use crate::runner::artifacts::RunArtifacts;
use crate::runner::prompt::build_prompt;
use crate::runner::result::{normalize_sources, parse_structured_result, strip_code_fence, StructuredResult};

/// Characters of stdout/stderr kept in failure diagnostics.
const DIAGNOSTIC_TAIL: usize = 2000;

/// Resolved per-run settings shared by every run in a batch.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub agent_bin: String,
    pub command_pattern: Regex,
    pub period: Period,
    pub year: i32,
    pub model: Option<String>,
    pub timeout: Duration,
    pub max_sources: usize,
    pub reject_command_events: bool,
}

/// Stable failure codes. Local to their run; a batch only ever fails as a
/// whole with `all_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MissingQuestion,
    Timeout,
    Aborted,
    NonZeroExit,
    NoFinalOutput,
    InvalidStructuredOutput,
    CommandEventsDetected,
    SpawnFailure,
    RunnerException,
    NotStartedDueAbort,
    AllFailed,
}

impl FailureReason {
    pub fn as_code(self) -> &'static str {
        match self {
            FailureReason::MissingQuestion => "missing_question",
            FailureReason::Timeout => "timeout",
            FailureReason::Aborted => "aborted",
            FailureReason::NonZeroExit => "non_zero_exit",
            FailureReason::NoFinalOutput => "no_final_output",
            FailureReason::InvalidStructuredOutput => "invalid_structured_output",
            FailureReason::CommandEventsDetected => "command_events_detected",
            FailureReason::SpawnFailure => "spawn_failure",
            FailureReason::RunnerException => "runner_exception",
            FailureReason::NotStartedDueAbort => "not_started_due_abort",
            FailureReason::AllFailed => "all_failed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Complete outcome of one query. Produced once per run; immutable.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub ok: bool,
    pub human_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StructuredResult>,
    pub telemetry: Telemetry,
    pub searches: u64,
    pub pages_opened: u64,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_tail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
}

impl RunOutcome {
    /// A failure outcome with no telemetry, for runs that never executed.
    pub fn synthetic_failure(reason: FailureReason, detail: &str) -> Self {
        Self {
            ok: false,
            human_text: format!("failed ({reason}): {detail}"),
            reason: Some(reason),
            detail: Some(detail.to_string()),
            hint: None,
            result: None,
            telemetry: Telemetry::default(),
            searches: 0,
            pages_opened: 0,
            elapsed_seconds: 0.0,
            exit_code: None,
            stdout_tail: None,
            stderr_tail: None,
        }
    }
}

/// Live counters snapshot passed to the progress observer.
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub searches: u64,
    pub pages_opened: u64,
    pub last_action: String,
}

/// Progress sink for one run. Purely observational: a no-op observer changes
/// neither timing nor outcomes.
pub type RunObserver = Arc<dyn Fn(RunUpdate) + Send + Sync>;

/// A no-op observer.
pub fn null_observer() -> RunObserver {
    Arc::new(|_| {})
}

/// Object-safe seam between the batch pool and run execution, so tests can
/// substitute a fake runner with canned outcomes.
pub trait QueryRunner: Send + Sync + 'static {
    fn run(
        self: Arc<Self>,
        question: String,
        observer: RunObserver,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = RunOutcome> + Send>>;
}

/// Production runner backed by the external agent subprocess.
pub struct AgentQueryRunner {
    cfg: RunnerConfig,
}

impl AgentQueryRunner {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self { cfg }
    }
}

impl QueryRunner for AgentQueryRunner {
    fn run(
        self: Arc<Self>,
        question: String,
        observer: RunObserver,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = RunOutcome> + Send>> {
        Box::pin(async move { run_query(&question, &self.cfg, &cancel, &observer).await })
    }
}

/// Run one query to its complete outcome.
pub async fn run_query(
    question: &str,
    cfg: &RunnerConfig,
    cancel: &CancellationToken,
    observer: &RunObserver,
) -> RunOutcome {
    let started = Instant::now();

    let question = question.trim();
    if question.is_empty() {
        return RunOutcome::synthetic_failure(FailureReason::MissingQuestion, "question is blank");
    }

    // Catch-all: staging or spawn problems (and anything else unexpected
    // bubbling up as an error) become a spawn_failure outcome rather than
    // unwinding into the batch.
    match run_query_inner(question, cfg, cancel, observer, started).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let mut outcome = RunOutcome::synthetic_failure(
                FailureReason::SpawnFailure,
                &format!("{err:#}"),
            );
            outcome.elapsed_seconds = started.elapsed().as_secs_f64();
            outcome
        }
    }
}

async fn run_query_inner(
    question: &str,
    cfg: &RunnerConfig,
    cancel: &CancellationToken,
    observer: &RunObserver,
    started: Instant,
) -> Result<RunOutcome> {
    let artifacts = RunArtifacts::stage()?;
    let prompt = build_prompt(question, cfg.period, cfg.year, cfg.max_sources);

    let mut parser = EventStreamParser::new(cfg.command_pattern.clone());
    let observer = observer.clone();
    let mut notify = |counters: &ProgressCounters| {
        observer(RunUpdate {
            searches: counters.searches,
            pages_opened: counters.pages_opened,
            last_action: counters.last_action.clone(),
        });
    };

    let invocation = AgentInvocation {
        bin: cfg.agent_bin.clone(),
        prompt,
        model: cfg.model.clone(),
        schema_path: artifacts.schema_path().to_path_buf(),
        output_path: artifacts.output_path().to_path_buf(),
        timeout: cfg.timeout,
    };

    let exit = run_agent(&invocation, &mut parser, cancel, &mut notify).await?;

    // Always attempt the artifact read, whatever the exit looked like.
    let final_text = artifacts.read_final_output();

    let telemetry = parser.telemetry;
    let counters = parser.counters;
    let elapsed = started.elapsed().as_secs_f64();

    let outcome = classify(
        cfg,
        exit.kind,
        final_text,
        telemetry,
        counters,
        elapsed,
        &exit.stdout,
        &exit.stderr,
    );

    if outcome.ok {
        info!(elapsed_secs = format!("{elapsed:.1}"), "run succeeded");
    } else {
        debug!(reason = %outcome.reason.map(|r| r.as_code()).unwrap_or("?"), "run failed");
    }

    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
fn classify(
    cfg: &RunnerConfig,
    kind: ExitKind,
    final_text: Option<String>,
    telemetry: Telemetry,
    counters: ProgressCounters,
    elapsed_seconds: f64,
    stdout: &str,
    stderr: &str,
) -> RunOutcome {
    let failure = |reason: FailureReason, detail: String, hint: Option<String>, exit_code: Option<i32>, result: Option<StructuredResult>| {
        RunOutcome {
            ok: false,
            human_text: compose_failure_text(reason, &detail, hint.as_deref()),
            reason: Some(reason),
            detail: Some(detail),
            hint,
            result,
            telemetry: telemetry.clone(),
            searches: counters.searches,
            pages_opened: counters.pages_opened,
            elapsed_seconds,
            exit_code,
            stdout_tail: Some(tail(stdout, DIAGNOSTIC_TAIL)),
            stderr_tail: Some(tail(stderr, DIAGNOSTIC_TAIL)),
        }
    };

    match kind {
        ExitKind::TimedOut => failure(
            FailureReason::Timeout,
            format!("run exceeded {}s", cfg.timeout.as_secs()),
            None,
            None,
            None,
        ),
        ExitKind::Aborted => failure(
            FailureReason::Aborted,
            "cancelled while running".to_string(),
            None,
            None,
            None,
        ),
        ExitKind::Exited(code) if code != Some(0) => failure(
            FailureReason::NonZeroExit,
            match code {
                Some(c) => format!("agent exited with code {c}"),
                None => "agent was killed by a signal".to_string(),
            },
            None,
            code,
            None,
        ),
        ExitKind::Exited(_) => {
            let raw = final_text.unwrap_or_default();
            if strip_code_fence(&raw).trim().is_empty() {
                return if telemetry.saw_usage() {
                    failure(
                        FailureReason::InvalidStructuredOutput,
                        "final artifact is empty".to_string(),
                        None,
                        Some(0),
                        None,
                    )
                } else {
                    failure(
                        FailureReason::NoFinalOutput,
                        "no final artifact and no usage telemetry".to_string(),
                        Some("the agent likely never finished a turn; retry with a higher --timeout-secs".to_string()),
                        Some(0),
                        None,
                    )
                };
            }

            match parse_structured_result(&raw) {
                Err(detail) => failure(
                    FailureReason::InvalidStructuredOutput,
                    format!("{detail}; artifact prefix: {}", prefix(&raw, 200)),
                    None,
                    Some(0),
                    None,
                ),
                Ok(mut result) => {
                    result.sources = normalize_sources(&result.sources, cfg.max_sources);

                    if cfg.reject_command_events && !telemetry.command_events.is_empty() {
                        // Result stays attached for diagnostics.
                        return failure(
                            FailureReason::CommandEventsDetected,
                            format!(
                                "{} command-like event(s) in telemetry: {}",
                                telemetry.command_events.len(),
                                telemetry.command_events.join(", ")
                            ),
                            None,
                            Some(0),
                            Some(result),
                        );
                    }

                    let human_text =
                        compose_success_text(&result, &telemetry, &counters, elapsed_seconds);

                    RunOutcome {
                        ok: true,
                        human_text,
                        reason: None,
                        detail: None,
                        hint: None,
                        result: Some(result),
                        telemetry,
                        searches: counters.searches,
                        pages_opened: counters.pages_opened,
                        elapsed_seconds,
                        exit_code: Some(0),
                        stdout_tail: None,
                        stderr_tail: None,
                    }
                }
            }
        }
    }
}

fn compose_success_text(
    result: &StructuredResult,
    telemetry: &Telemetry,
    counters: &ProgressCounters,
    elapsed_seconds: f64,
) -> String {
    use std::fmt::Write;

    let mut text = String::new();
    let _ = writeln!(text, "{}", result.answer.trim());
    let _ = writeln!(
        text,
        "as of: {} | confidence: {:.2}",
        result.as_of.trim(),
        result.confidence
    );

    if !result.sources.is_empty() {
        let _ = writeln!(text, "sources:");
        for (i, url) in result.sources.iter().enumerate() {
            let _ = writeln!(text, "  {}. {url}", i + 1);
        }
    }

    if !result.notes.trim().is_empty() {
        let _ = writeln!(text, "notes: {}", result.notes.trim());
    }

    if !telemetry.command_events.is_empty() {
        let _ = writeln!(
            text,
            "warning: {} command-like event(s) observed in telemetry",
            telemetry.command_events.len()
        );
    }

    let _ = write!(
        text,
        "({elapsed_seconds:.1}s, {} searches, {} pages opened)",
        counters.searches, counters.pages_opened
    );

    text
}

fn compose_failure_text(reason: FailureReason, detail: &str, hint: Option<&str>) -> String {
    match hint {
        Some(hint) => format!("failed ({reason}): {detail}\nhint: {hint}"),
        None => format!("failed ({reason}): {detail}"),
    }
}

/// Last `n` characters of a string.
fn tail(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        return s.to_string();
    }
    s.chars().skip(count - n).collect()
}

/// First `n` characters of a string.
fn prefix(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> RunnerConfig {
        RunnerConfig {
            agent_bin: "codex".into(),
            command_pattern: Regex::new("(?i)command|shell").unwrap(),
            period: Period::Early,
            year: 2026,
            model: None,
            timeout: Duration::from_secs(120),
            max_sources: 5,
            reject_command_events: true,
        }
    }

    fn counters() -> ProgressCounters {
        ProgressCounters {
            searches: 3,
            pages_opened: 2,
            last_action: "finalizing".into(),
        }
    }

    fn valid_artifact() -> String {
        r#"{"answer":"yes","as_of":"early 2026","confidence":0.7,"sources":["https://a","ftp://x","https://a"],"notes":""}"#
            .to_string()
    }

    #[test]
    fn timeout_outranks_exit_code() {
        let o = classify(
            &test_cfg(),
            ExitKind::TimedOut,
            Some(valid_artifact()),
            Telemetry::default(),
            counters(),
            1.0,
            "",
            "",
        );
        assert_eq!(o.reason, Some(FailureReason::Timeout));
    }

    #[test]
    fn zero_exit_empty_artifact_no_usage_is_no_final_output() {
        let o = classify(
            &test_cfg(),
            ExitKind::Exited(Some(0)),
            None,
            Telemetry::default(),
            counters(),
            1.0,
            "",
            "",
        );
        assert_eq!(o.reason, Some(FailureReason::NoFinalOutput));
        assert!(o.hint.as_deref().unwrap_or("").contains("timeout"));
    }

    #[test]
    fn zero_exit_empty_artifact_with_usage_is_invalid_output() {
        let telemetry = Telemetry {
            usage: Some(Default::default()),
            ..Telemetry::default()
        };
        let o = classify(
            &test_cfg(),
            ExitKind::Exited(Some(0)),
            Some("  ".into()),
            telemetry,
            counters(),
            1.0,
            "",
            "",
        );
        assert_eq!(o.reason, Some(FailureReason::InvalidStructuredOutput));
    }

    #[test]
    fn command_events_fail_the_run_but_keep_the_result() {
        let telemetry = Telemetry {
            command_events: vec!["command_execution".into()],
            ..Telemetry::default()
        };
        let o = classify(
            &test_cfg(),
            ExitKind::Exited(Some(0)),
            Some(valid_artifact()),
            telemetry,
            counters(),
            1.0,
            "",
            "",
        );
        assert_eq!(o.reason, Some(FailureReason::CommandEventsDetected));
        assert!(o.result.is_some());
    }

    #[test]
    fn command_events_become_a_warning_when_policy_is_off() {
        let mut cfg = test_cfg();
        cfg.reject_command_events = false;
        let telemetry = Telemetry {
            command_events: vec!["command_execution".into()],
            ..Telemetry::default()
        };
        let o = classify(
            &cfg,
            ExitKind::Exited(Some(0)),
            Some(valid_artifact()),
            telemetry,
            counters(),
            1.0,
            "",
            "",
        );
        assert!(o.ok);
        assert!(o.human_text.contains("warning: 1 command-like"));
    }

    #[test]
    fn success_normalizes_sources_and_reports_counters() {
        let o = classify(
            &test_cfg(),
            ExitKind::Exited(Some(0)),
            Some(valid_artifact()),
            Telemetry::default(),
            counters(),
            2.5,
            "",
            "",
        );
        assert!(o.ok);
        let result = o.result.unwrap();
        assert_eq!(result.sources, vec!["https://a".to_string()]);
        assert!(o.human_text.contains("3 searches"));
        assert!(o.human_text.contains("2 pages opened"));
    }

    #[tokio::test]
    async fn blank_question_fails_fast() {
        let o = run_query(
            "   ",
            &test_cfg(),
            &CancellationToken::new(),
            &null_observer(),
        )
        .await;
        assert_eq!(o.reason, Some(FailureReason::MissingQuestion));
    }
}
