// src/batch/state.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::runner::{FailureReason, RunOutcome};

/// Lifecycle of one batch entry. Only ever moves forward:
/// `pending → running → {ok | failed}`; a terminal status is never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Ok,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Ok | RunStatus::Failed)
    }
}

/// Mutable per-query record for the lifetime of a batch. Owned exclusively
/// by the orchestrator's aggregation loop; updates for a given index only
/// ever originate from that index's own run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub index: usize,
    pub question: String,
    pub status: RunStatus,
    pub searches: u64,
    pub pages_opened: u64,
    pub last_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(index: usize, question: &str) -> Self {
        Self {
            index,
            question: question.to_string(),
            status: RunStatus::Pending,
            searches: 0,
            pages_opened: 0,
            last_action: String::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        if self.status != RunStatus::Pending {
            warn!(index = self.index, status = ?self.status, "ignoring start for non-pending run");
            return;
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.last_action = "starting".to_string();
    }

    /// Terminal transition. Pending runs may finish directly (a batch
    /// cancelled before they were claimed); terminal runs never change.
    pub fn mark_finished(&mut self, ok: bool) {
        if self.status.is_terminal() {
            warn!(index = self.index, status = ?self.status, "ignoring finish for terminal run");
            return;
        }
        self.status = if ok { RunStatus::Ok } else { RunStatus::Failed };
        self.finished_at = Some(Utc::now());
    }

    /// Seconds the run has been (or was) active, for display.
    pub fn elapsed_seconds(&self) -> f64 {
        let secs = |delta: chrono::TimeDelta| delta.num_milliseconds() as f64 / 1000.0;
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => secs(end - start).max(0.0),
            (Some(start), None) => secs(Utc::now() - start).max(0.0),
            _ => 0.0,
        }
    }
}

/// Aggregate numbers reported with every batch outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub parallelism: usize,
    pub elapsed_seconds: f64,
}

/// The merged result of a whole batch.
///
/// Entry order in `runs`/`outcomes` always matches submission order,
/// whatever order the runs completed in.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub ok: bool,
    pub partial_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip)]
    pub report: String,
    pub summary: BatchSummary,
    pub runs: Vec<RunState>,
    pub outcomes: Vec<RunOutcome>,
}
