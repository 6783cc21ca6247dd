// src/events/parser.rs

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::events::types::{item_type_of, AgentEvent, Telemetry, TraceEntry};
use crate::progress::ProgressCounters;

/// Incremental parser for the agent's line-delimited JSON event stream.
///
/// Input arrives as arbitrarily fragmented byte chunks: a chunk may split a
/// line in the middle or carry several lines at once. Bytes are buffered
/// until a newline completes a line; each complete line gets one decode
/// attempt. Lines that are not valid JSON are skipped without touching any
/// state.
pub struct EventStreamParser {
    command_pattern: Regex,
    partial: Vec<u8>,
    pub counters: ProgressCounters,
    pub telemetry: Telemetry,
}

impl EventStreamParser {
    pub fn new(command_pattern: Regex) -> Self {
        Self {
            command_pattern,
            partial: Vec::new(),
            counters: ProgressCounters::default(),
            telemetry: Telemetry::default(),
        }
    }

    /// Feed one chunk of raw stdout. Returns true if progress state changed
    /// (used by the caller to decide whether to emit a live update).
    pub fn push_chunk(&mut self, chunk: &[u8]) -> bool {
        let mut progressed = false;
        for byte in chunk {
            if *byte == b'\n' {
                let line = std::mem::take(&mut self.partial);
                progressed |= self.apply_line(&line);
            } else {
                self.partial.push(*byte);
            }
        }
        progressed
    }

    /// Signal end of stream: any trailing partial line without a terminating
    /// newline still gets a final decode pass.
    pub fn finish(&mut self) -> bool {
        if self.partial.is_empty() {
            return false;
        }
        let line = std::mem::take(&mut self.partial);
        self.apply_line(&line)
    }

    fn apply_line(&mut self, line: &[u8]) -> bool {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                trace!(len = trimmed.len(), "skipping malformed event line");
                return false;
            }
        };

        // Policy-risk signal, independent of the classification below.
        if let Some(item_type) = item_type_of(&value) {
            if self.command_pattern.is_match(&item_type) {
                self.telemetry.command_events.push(item_type);
            }
        }

        match AgentEvent::from_json(&value) {
            AgentEvent::Search { query } => {
                self.counters.record_search(&query);
                self.telemetry.trace.push(TraceEntry::Search { query });
                true
            }
            AgentEvent::PageOpen { url } => {
                self.counters.record_page_open(&url);
                self.telemetry.trace.push(TraceEntry::PageOpen { url });
                true
            }
            AgentEvent::ItemCompleted { item_type } => {
                self.counters.set_last_action(&item_type);
                true
            }
            AgentEvent::TurnCompleted { usage } => {
                self.telemetry.usage = Some(usage);
                self.counters.set_last_action("finalizing");
                true
            }
            AgentEvent::Error { message } => {
                self.telemetry.errors.push(message);
                self.counters.set_last_action("error event");
                true
            }
            AgentEvent::Unrecognized => false,
        }
    }
}
