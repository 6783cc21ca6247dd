// src/batch/report.rs

//! Batch-wide status formatting and the throttled progress emitter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::batch::state::{BatchSummary, RunState, RunStatus};
use crate::runner::RunOutcome;

/// Observational sink for human-readable incremental status text.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Minimum interval between unforced status emissions.
pub const STATUS_THROTTLE: Duration = Duration::from_secs(1);

/// Emits batch status lines to an optional sink, rate-limiting unforced
/// updates. Transitions (run start/finish) and heartbeats are always forced
/// so observers see activity during long silent phases.
///
/// Absence of a sink changes nothing about timing or outcomes; the throttle
/// clock advances the same way either side of `None`.
pub struct StatusEmitter {
    sink: Option<ProgressSink>,
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl StatusEmitter {
    pub fn new(sink: Option<ProgressSink>, min_interval: Duration) -> Self {
        Self {
            sink,
            min_interval,
            last_emit: None,
        }
    }

    pub fn emit(&mut self, states: &[RunState], force: bool) {
        let now = Instant::now();
        if !force {
            if let Some(last) = self.last_emit {
                if now.duration_since(last) < self.min_interval {
                    return;
                }
            }
        }
        self.last_emit = Some(now);

        if let Some(sink) = &self.sink {
            sink(&format_status(states));
        }
    }
}

/// One status line per run, submission order.
pub fn format_status(states: &[RunState]) -> String {
    let mut lines = Vec::with_capacity(states.len());
    for run in states {
        lines.push(format_status_line(run));
    }
    lines.join("\n")
}

fn format_status_line(run: &RunState) -> String {
    let n = run.index + 1;
    match run.status {
        RunStatus::Pending => format!("#{n} pending"),
        RunStatus::Running => format!(
            "#{n} running {:.0}s | {} searches, {} pages | {}",
            run.elapsed_seconds(),
            run.searches,
            run.pages_opened,
            if run.last_action.is_empty() {
                "working"
            } else {
                &run.last_action
            },
        ),
        RunStatus::Ok => format!(
            "#{n} ok ({:.1}s, {} searches, {} pages)",
            run.elapsed_seconds(),
            run.searches,
            run.pages_opened,
        ),
        RunStatus::Failed => format!("#{n} failed ({:.1}s)", run.elapsed_seconds()),
    }
}

/// Compose the final human-readable report: one section per run plus the
/// summary block.
pub fn compose_report(states: &[RunState], outcomes: &[RunOutcome], summary: &BatchSummary) -> String {
    use std::fmt::Write;

    let mut text = String::new();
    for (run, outcome) in states.iter().zip(outcomes) {
        let _ = writeln!(text, "== Q{}: {}", run.index + 1, run.question);
        let _ = writeln!(text, "{}", outcome.human_text.trim_end());
        let _ = writeln!(text);
    }

    let _ = write!(
        text,
        "summary: {}/{} succeeded ({} failed), parallelism {}, {:.1}s",
        summary.succeeded, summary.total, summary.failed, summary.parallelism, summary.elapsed_seconds,
    );

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn states() -> Vec<RunState> {
        let mut a = RunState::new(0, "first");
        a.mark_running();
        let b = RunState::new(1, "second");
        vec![a, b]
    }

    #[test]
    fn unforced_emissions_are_throttled() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink: ProgressSink = {
            let seen = seen.clone();
            Arc::new(move |s: &str| seen.lock().unwrap().push(s.to_string()))
        };

        let mut emitter = StatusEmitter::new(Some(sink), Duration::from_secs(3600));
        let states = states();
        emitter.emit(&states, false);
        emitter.emit(&states, false);
        emitter.emit(&states, false);
        assert_eq!(seen.lock().unwrap().len(), 1);

        emitter.emit(&states, true);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn missing_sink_is_harmless() {
        let mut emitter = StatusEmitter::new(None, STATUS_THROTTLE);
        emitter.emit(&states(), true);
    }

    #[test]
    fn status_lines_are_positional() {
        let text = format_status(&states());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("#1 running"));
        assert_eq!(lines[1], "#2 pending");
    }
}
