#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use scoutbatch::runner::result::StructuredResult;
use scoutbatch::runner::{FailureReason, QueryRunner, RunObserver, RunOutcome, RunUpdate};

/// A fake runner that never spawns processes. Behavior is scripted through
/// the question text:
///
/// - `ok:<x>` — report one search, sleep `delay`, succeed.
/// - `slow:<x>` — like `ok:` but sleeps 4x `delay`.
/// - `fail:<x>` — sleep `delay`, fail with `non_zero_exit`.
/// - `panic:<x>` — panic inside the run task.
/// - `cancel:<x>` — cancel the batch token mid-run, then succeed.
/// - `wait:<x>` — block until cancelled, then fail with `aborted`.
pub struct FakeRunner {
    pub delay: Duration,
    /// Questions in the order runs actually started.
    pub started: Arc<Mutex<Vec<String>>>,
    current: Arc<AtomicUsize>,
    /// High-water mark of concurrently active runs.
    pub max_seen: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::new(Mutex::new(Vec::new())),
            current: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn started_list(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

pub fn ok_outcome(question: &str) -> RunOutcome {
    RunOutcome {
        ok: true,
        human_text: format!("answer for {question}"),
        reason: None,
        detail: None,
        hint: None,
        result: Some(StructuredResult {
            answer: format!("answer for {question}"),
            as_of: "early 2026".to_string(),
            confidence: 0.9,
            sources: vec!["https://example.test".to_string()],
            notes: String::new(),
        }),
        telemetry: Default::default(),
        searches: 1,
        pages_opened: 0,
        elapsed_seconds: 0.1,
        exit_code: Some(0),
        stdout_tail: None,
        stderr_tail: None,
    }
}

impl QueryRunner for FakeRunner {
    fn run(
        self: Arc<Self>,
        question: String,
        observer: RunObserver,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = RunOutcome> + Send>> {
        Box::pin(async move {
            self.started.lock().unwrap().push(question.clone());
            let active = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(active, Ordering::SeqCst);

            let outcome = if question.starts_with("panic:") {
                panic!("scripted panic for {question}");
            } else if question.starts_with("cancel:") {
                cancel.cancel();
                tokio::time::sleep(self.delay).await;
                ok_outcome(&question)
            } else if question.starts_with("wait:") {
                cancel.cancelled().await;
                RunOutcome::synthetic_failure(FailureReason::Aborted, "cancelled while running")
            } else if question.starts_with("fail:") {
                tokio::time::sleep(self.delay).await;
                RunOutcome::synthetic_failure(FailureReason::NonZeroExit, "scripted failure")
            } else {
                observer(RunUpdate {
                    searches: 1,
                    pages_opened: 0,
                    last_action: format!("search: {question}"),
                });
                let delay = if question.starts_with("slow:") {
                    self.delay * 4
                } else {
                    self.delay
                };
                tokio::time::sleep(delay).await;
                ok_outcome(&question)
            };

            self.current.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }
}
