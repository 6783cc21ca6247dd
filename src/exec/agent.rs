// src/exec/agent.rs

//! Subprocess lifecycle manager for one agent run.
//!
//! Owns a single external process: launches it with a fixed,
//! security-constrained argument set, streams stdout through the event
//! parser in real time, enforces the per-run timeout with a graceful →
//! forceful termination sequence, and honors external cancellation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::EventStreamParser;
use crate::progress::ProgressCounters;

/// Interval between forced progress emissions while the process is alive.
pub const HEARTBEAT: Duration = Duration::from_secs(5);
/// Window between the graceful termination signal and the forceful kill.
pub const KILL_GRACE: Duration = Duration::from_millis(1500);
/// How long to wait for leftover stdout after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_BUF_SIZE: usize = 8192;

/// Everything needed to launch one agent process.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Agent binary (name or path).
    pub bin: String,
    /// The research prompt, passed as the final argument.
    pub prompt: String,
    /// Optional model override; appended only when non-blank after trimming.
    pub model: Option<String>,
    /// Path of the staged output-schema artifact.
    pub schema_path: PathBuf,
    /// Path the agent writes its final artifact to.
    pub output_path: PathBuf,
    /// Hard per-run timeout (already clamped by the caller).
    pub timeout: Duration,
}

/// How the process run ended. Timeout takes precedence over abort, which
/// takes precedence over the plain exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Process exited on its own; `None` means killed by a signal we did not
    /// send (no exit code available).
    Exited(Option<i32>),
    /// The per-run timeout fired and the process was terminated.
    TimedOut,
    /// External cancellation terminated the process.
    Aborted,
}

/// Result of one agent run. A spawn failure never produces this; it surfaces
/// as an `Err` from [`run_agent`], a distinct failure class.
#[derive(Debug)]
pub struct AgentExit {
    pub kind: ExitKind,
    /// Full buffered stdout (also parsed line-by-line during the run).
    pub stdout: String,
    /// Full buffered stderr.
    pub stderr: String,
}

enum StreamEnd {
    Eof,
    TimedOut,
    Aborted,
}

enum WaitEnd {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Aborted,
}

/// Run one agent process to completion.
///
/// `notify` is invoked with the current counters whenever the parser reports
/// progress, on every heartbeat tick, and once when a timeout or abort is
/// recorded. It must be cheap; it runs on the run's own callback chain.
pub async fn run_agent(
    inv: &AgentInvocation,
    parser: &mut EventStreamParser,
    cancel: &CancellationToken,
    notify: &mut (dyn FnMut(&ProgressCounters) + Send),
) -> Result<AgentExit> {
    let mut cmd = Command::new(&inv.bin);
    cmd.arg("exec")
        .arg("--json")
        .arg("--sandbox")
        .arg("read-only")
        .arg("--skip-git-repo-check")
        .arg("--ephemeral")
        .arg("--output-schema")
        .arg(&inv.schema_path)
        .arg("--output-last-message")
        .arg(&inv.output_path);

    if let Some(model) = inv.model.as_deref() {
        let model = model.trim();
        if !model.is_empty() {
            cmd.arg("--model").arg(model);
        }
    }

    cmd.arg("--")
        .arg(&inv.prompt)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning agent process '{}'", inv.bin))?;

    info!(bin = %inv.bin, timeout_secs = inv.timeout.as_secs(), "agent process started");

    let mut stdout = child.stdout.take().context("agent stdout pipe missing")?;
    let stderr = child.stderr.take();

    // Collect stderr in the background; it is only buffered, never streamed.
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        buf
    });

    let mut stdout_buf: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; READ_BUF_SIZE];

    let timeout_sleep = sleep(inv.timeout);
    tokio::pin!(timeout_sleep);

    let mut heartbeat = interval(HEARTBEAT);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // An interval's first tick fires immediately; push it out one period.
    heartbeat.reset();

    // Phase 1: stream stdout until EOF, timeout, or cancellation. A token
    // already cancelled at entry wins the race immediately.
    let stream_end = loop {
        tokio::select! {
            res = stdout.read(&mut read_buf) => {
                match res {
                    Ok(0) => break StreamEnd::Eof,
                    Ok(n) => {
                        stdout_buf.extend_from_slice(&read_buf[..n]);
                        if parser.push_chunk(&read_buf[..n]) {
                            notify(&parser.counters);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "agent stdout read error; treating as EOF");
                        break StreamEnd::Eof;
                    }
                }
            }
            _ = heartbeat.tick() => {
                notify(&parser.counters);
            }
            () = &mut timeout_sleep => break StreamEnd::TimedOut,
            _ = cancel.cancelled() => break StreamEnd::Aborted,
        }
    };

    // Phase 2: resolve the exit. The agent may close stdout and keep
    // running, so EOF still waits under the same timeout/cancel bounds.
    let wait_end = match stream_end {
        StreamEnd::Eof => {
            tokio::select! {
                status = child.wait() => WaitEnd::Exited(status),
                () = &mut timeout_sleep => WaitEnd::TimedOut,
                _ = cancel.cancelled() => WaitEnd::Aborted,
            }
        }
        StreamEnd::TimedOut => WaitEnd::TimedOut,
        StreamEnd::Aborted => WaitEnd::Aborted,
    };

    let kind = match wait_end {
        WaitEnd::Exited(status) => {
            let status = status.context("waiting for agent process")?;
            ExitKind::Exited(status.code())
        }
        WaitEnd::TimedOut => {
            parser
                .counters
                .set_last_action(&format!("timed out after {}s", inv.timeout.as_secs()));
            notify(&parser.counters);
            terminate_escalating(&mut child).await;
            ExitKind::TimedOut
        }
        WaitEnd::Aborted => {
            parser.counters.set_last_action("aborted");
            notify(&parser.counters);
            terminate_escalating(&mut child).await;
            ExitKind::Aborted
        }
    };

    // The pipe may still hold buffered events after termination; read to
    // EOF but never wait long for it.
    let _ = tokio::time::timeout(
        DRAIN_TIMEOUT,
        drain_stdout(&mut stdout, &mut stdout_buf, parser),
    )
    .await;

    // Final parse pass over any unterminated trailing line.
    if parser.finish() {
        notify(&parser.counters);
    }

    // A grandchild holding the stderr pipe open must not stall the run.
    let stderr_buf = match tokio::time::timeout(DRAIN_TIMEOUT, stderr_task).await {
        Ok(Ok(buf)) => buf,
        _ => Vec::new(),
    };

    debug!(?kind, stdout_bytes = stdout_buf.len(), "agent process finished");

    Ok(AgentExit {
        kind,
        stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
    })
}

async fn drain_stdout(
    stdout: &mut ChildStdout,
    stdout_buf: &mut Vec<u8>,
    parser: &mut EventStreamParser,
) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                stdout_buf.extend_from_slice(&buf[..n]);
                parser.push_chunk(&buf[..n]);
            }
        }
    }
}

/// Two-phase termination: ask nicely, then kill after a short grace window.
/// The forceful phase is skipped when the process exits early.
async fn terminate_escalating(child: &mut Child) {
    send_graceful_signal(child);

    let exited_in_grace = tokio::select! {
        status = child.wait() => {
            debug!(?status, "agent exited within the grace window");
            true
        }
        _ = sleep(KILL_GRACE) => false,
    };

    if !exited_in_grace {
        warn!("agent ignored graceful termination; killing");
        if let Err(err) = child.start_kill() {
            debug!(error = %err, "kill failed (process likely already gone)");
        }
        let _ = child.wait().await;
    }
}

#[cfg(unix)]
fn send_graceful_signal(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(error = %err, "SIGTERM failed (process likely already gone)");
            }
        }
        None => debug!("no pid for graceful signal; process already reaped"),
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(child: &Child) {
    // No portable graceful signal; the forceful phase follows after the
    // grace window regardless.
    let _ = child;
}
