// src/batch/pool.rs

//! The bounded-parallelism worker pool over a list of questions.
//!
//! Workers share a claim cursor: each one atomically takes the next
//! unclaimed index, runs that query to completion, then claims again, so a
//! slow run never blocks unrelated queries behind it. All mutable batch
//! state lives in the aggregation loop, fed by per-run events over a
//! channel; a given index's events only ever originate from that index's
//! own run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::report::{compose_report, ProgressSink, StatusEmitter, STATUS_THROTTLE};
use crate::batch::state::{BatchOutcome, BatchSummary, RunState};
use crate::runner::{FailureReason, QueryRunner, RunObserver, RunOutcome, RunUpdate};

/// Fixed ceiling on concurrent agent processes, whatever the caller asks for.
pub const MAX_PARALLELISM: usize = 5;

/// Interval between forced batch-wide status emissions.
pub const BATCH_HEARTBEAT: Duration = Duration::from_secs(5);

/// Capacity of the run-event channel. Progress events are lossy (dropped
/// when the channel is full); start/finish transitions always await space.
const EVENT_CHANNEL_CAPACITY: usize = 256;

enum RunEvent {
    Started { index: usize },
    Progress { index: usize, update: RunUpdate },
    Finished { index: usize, outcome: Box<RunOutcome> },
}

/// Execute a batch of already-normalized, non-blank questions.
///
/// Entry order of the returned outcomes matches `questions` regardless of
/// completion order. Run failures never surface as errors; the only error
/// here is the empty-input precondition.
pub async fn run_batch(
    questions: Vec<String>,
    requested_parallelism: usize,
    runner: Arc<dyn QueryRunner>,
    cancel: CancellationToken,
    sink: Option<ProgressSink>,
) -> Result<BatchOutcome> {
    if questions.is_empty() {
        bail!("batch requires at least one non-blank question");
    }

    let started = Instant::now();

    if questions.len() == 1 {
        return Ok(run_single(questions, runner, cancel, sink, started).await);
    }

    let parallelism = clamp_parallelism(requested_parallelism, questions.len());
    info!(
        total = questions.len(),
        parallelism, "starting batch pool"
    );

    let questions = Arc::new(questions);
    let cursor = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::channel::<RunEvent>(EVENT_CHANNEL_CAPACITY);

    let mut workers = Vec::with_capacity(parallelism);
    for worker_id in 0..parallelism {
        let questions = Arc::clone(&questions);
        let cursor = Arc::clone(&cursor);
        let runner = Arc::clone(&runner);
        let cancel = cancel.clone();
        let tx = tx.clone();

        workers.push(tokio::spawn(async move {
            worker_loop(worker_id, questions, cursor, runner, cancel, tx).await;
        }));
    }
    // The aggregation loop ends when every worker has dropped its sender.
    drop(tx);

    let mut states: Vec<RunState> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| RunState::new(i, q))
        .collect();
    let mut outcomes: Vec<Option<RunOutcome>> = (0..questions.len()).map(|_| None).collect();
    let mut emitter = StatusEmitter::new(sink, STATUS_THROTTLE);

    let mut heartbeat = interval(BATCH_HEARTBEAT);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    heartbeat.reset();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(RunEvent::Started { index }) => {
                        states[index].mark_running();
                        emitter.emit(&states, true);
                    }
                    Some(RunEvent::Progress { index, update }) => {
                        let run = &mut states[index];
                        // Late progress from an already-finished run is stale.
                        if !run.status.is_terminal() {
                            run.searches = update.searches;
                            run.pages_opened = update.pages_opened;
                            run.last_action = update.last_action;
                            emitter.emit(&states, false);
                        }
                    }
                    Some(RunEvent::Finished { index, outcome }) => {
                        let run = &mut states[index];
                        run.searches = outcome.searches;
                        run.pages_opened = outcome.pages_opened;
                        run.mark_finished(outcome.ok);
                        outcomes[index] = Some(*outcome);
                        emitter.emit(&states, true);
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                emitter.emit(&states, true);
            }
        }
    }

    for worker in workers {
        if let Err(err) = worker.await {
            warn!(error = %err, "batch worker task failed");
        }
    }

    // Indices never claimed before cancellation still get a positional
    // outcome.
    let outcomes: Vec<RunOutcome> = outcomes
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            Some(outcome) => outcome,
            None => {
                states[index].mark_finished(false);
                RunOutcome::synthetic_failure(
                    FailureReason::NotStartedDueAbort,
                    "batch was cancelled before this run started",
                )
            }
        })
        .collect();

    emitter.emit(&states, true);

    Ok(merge(states, outcomes, parallelism, started))
}

/// Degenerate single-question case: no pool, no claim cursor; the one run's
/// outcome passes through unchanged apart from panic conversion.
async fn run_single(
    questions: Vec<String>,
    runner: Arc<dyn QueryRunner>,
    cancel: CancellationToken,
    sink: Option<ProgressSink>,
    started: Instant,
) -> BatchOutcome {
    let question = questions.into_iter().next().unwrap_or_default();
    let mut state = RunState::new(0, &question);

    if cancel.is_cancelled() {
        state.mark_finished(false);
        let outcome = RunOutcome::synthetic_failure(
            FailureReason::NotStartedDueAbort,
            "batch was cancelled before this run started",
        );
        return merge(vec![state], vec![outcome], 1, started);
    }

    // Progress still flows through the same emitter machinery, driven
    // directly by the run's observer instead of the aggregation loop.
    let emitter = Arc::new(std::sync::Mutex::new(StatusEmitter::new(
        sink,
        STATUS_THROTTLE,
    )));

    state.mark_running();
    {
        let mut emitter = emitter.lock().unwrap_or_else(|e| e.into_inner());
        emitter.emit(std::slice::from_ref(&state), true);
    }

    let observer: RunObserver = {
        let emitter = Arc::clone(&emitter);
        let live = Arc::new(std::sync::Mutex::new(state.clone()));
        Arc::new(move |update: RunUpdate| {
            let mut run = live.lock().unwrap_or_else(|e| e.into_inner());
            run.searches = update.searches;
            run.pages_opened = update.pages_opened;
            run.last_action = update.last_action;
            let mut emitter = emitter.lock().unwrap_or_else(|e| e.into_inner());
            emitter.emit(std::slice::from_ref(&run), false);
        })
    };

    let outcome = match tokio::spawn(runner.run(question, observer, cancel)).await {
        Ok(outcome) => outcome,
        Err(err) => RunOutcome::synthetic_failure(
            FailureReason::RunnerException,
            &format!("run task failed: {err}"),
        ),
    };

    state.searches = outcome.searches;
    state.pages_opened = outcome.pages_opened;
    state.mark_finished(outcome.ok);
    {
        let mut emitter = emitter.lock().unwrap_or_else(|e| e.into_inner());
        emitter.emit(std::slice::from_ref(&state), true);
    }

    merge(vec![state], vec![outcome], 1, started)
}

async fn worker_loop(
    worker_id: usize,
    questions: Arc<Vec<String>>,
    cursor: Arc<AtomicUsize>,
    runner: Arc<dyn QueryRunner>,
    cancel: CancellationToken,
    tx: mpsc::Sender<RunEvent>,
) {
    loop {
        // Checked before every claim so an aborted batch stops taking on
        // new work; runs already in flight are cancelled via the token
        // inside the lifecycle manager.
        if cancel.is_cancelled() {
            debug!(worker_id, "cancellation observed; worker exiting");
            return;
        }

        let index = cursor.fetch_add(1, Ordering::SeqCst);
        if index >= questions.len() {
            debug!(worker_id, "question list exhausted; worker exiting");
            return;
        }

        let question = questions[index].clone();
        if tx.send(RunEvent::Started { index }).await.is_err() {
            return;
        }

        let observer: RunObserver = {
            let tx = tx.clone();
            Arc::new(move |update: RunUpdate| {
                // Lossy on a full channel: progress is throttled downstream
                // anyway, and transitions use the awaiting send path.
                let _ = tx.try_send(RunEvent::Progress { index, update });
            })
        };

        let outcome = match tokio::spawn(runner.clone().run(question, observer, cancel.clone())).await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(index, error = %err, "run task failed");
                RunOutcome::synthetic_failure(
                    FailureReason::RunnerException,
                    &format!("run task failed: {err}"),
                )
            }
        };

        if tx
            .send(RunEvent::Finished {
                index,
                outcome: Box::new(outcome),
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

fn clamp_parallelism(requested: usize, question_count: usize) -> usize {
    requested.clamp(1, question_count.min(MAX_PARALLELISM))
}

fn merge(
    states: Vec<RunState>,
    outcomes: Vec<RunOutcome>,
    parallelism: usize,
    started: Instant,
) -> BatchOutcome {
    let total = outcomes.len();
    let failed = outcomes.iter().filter(|o| !o.ok).count();
    let succeeded = total - failed;

    let summary = BatchSummary {
        total,
        succeeded,
        failed,
        parallelism,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    };

    let ok = succeeded > 0;
    let report = compose_report(&states, &outcomes, &summary);

    BatchOutcome {
        ok,
        partial_failure: ok && failed > 0,
        reason: if ok { None } else { Some(FailureReason::AllFailed) },
        report,
        summary,
        runs: states,
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallelism_clamps_to_question_count_and_ceiling() {
        assert_eq!(clamp_parallelism(99, 8), 5);
        assert_eq!(clamp_parallelism(99, 3), 3);
        assert_eq!(clamp_parallelism(0, 3), 1);
        assert_eq!(clamp_parallelism(2, 8), 2);
    }
}
