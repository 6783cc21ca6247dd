// src/events/types.rs

use serde::Serialize;
use serde_json::Value;

/// One decoded event from the agent's stdout stream.
///
/// The agent's payloads are duck-typed JSON; decoding into this closed set of
/// variants happens once at the parser boundary so nothing downstream probes
/// raw fields. Events are transient: they update counters/telemetry and are
/// discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A completed `web_search` item.
    Search { query: String },
    /// A completed `page_open` item.
    PageOpen { url: String },
    /// Any other completed item; only its type tag is interesting.
    ItemCompleted { item_type: String },
    /// End-of-turn event carrying token usage.
    TurnCompleted { usage: UsageSummary },
    /// An error-tagged event from the agent.
    Error { message: String },
    /// Valid JSON, but nothing we classify.
    Unrecognized,
}

impl AgentEvent {
    /// Decode a parsed JSON value into an event.
    pub fn from_json(value: &Value) -> AgentEvent {
        match value.get("type").and_then(Value::as_str) {
            Some("item.completed") => {
                let item = value.get("item").unwrap_or(&Value::Null);
                match item_type_of(value) {
                    Some(item_type) if item_type == "web_search" => AgentEvent::Search {
                        query: item
                            .get("query")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                    Some(item_type) if item_type == "page_open" => AgentEvent::PageOpen {
                        url: item
                            .get("url")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                    Some(item_type) => AgentEvent::ItemCompleted { item_type },
                    None => AgentEvent::Unrecognized,
                }
            }
            Some("turn.completed") => match value.get("usage") {
                Some(usage) => AgentEvent::TurnCompleted {
                    usage: UsageSummary::from_json(usage),
                },
                None => AgentEvent::Unrecognized,
            },
            Some("error") => AgentEvent::Error {
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            _ => AgentEvent::Unrecognized,
        }
    }
}

/// Extract the item-type tag of a completed item, if any.
///
/// Kept separate from classification: the command-like policy signal matches
/// on this string regardless of how the event is otherwise classified.
pub fn item_type_of(value: &Value) -> Option<String> {
    value
        .get("item")
        .and_then(|item| item.get("item_type"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Token usage reported on `turn.completed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageSummary {
    fn from_json(usage: &Value) -> Self {
        let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
        Self {
            input_tokens: field("input_tokens"),
            cached_input_tokens: field("cached_input_tokens"),
            output_tokens: field("output_tokens"),
        }
    }
}

/// One entry in the ordered search trace of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    Search { query: String },
    PageOpen { url: String },
}

/// Everything accumulated over a run's full event stream.
///
/// Built once per run, attached to its outcome, immutable afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Telemetry {
    /// Ordered search/open actions.
    pub trace: Vec<TraceEntry>,
    /// Usage from the last `turn.completed`, if any was seen.
    pub usage: Option<UsageSummary>,
    /// Messages from error-tagged events.
    pub errors: Vec<String>,
    /// Item types that matched the command pattern; a policy-risk signal.
    pub command_events: Vec<String>,
}

impl Telemetry {
    /// Whether any usage event was ever observed. A zero-exit run with no
    /// final artifact *and* no usage is a strong timeout signal.
    pub fn saw_usage(&self) -> bool {
        self.usage.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_search_item() {
        let v = json!({"type":"item.completed","item":{"item_type":"web_search","query":"rust"}});
        assert_eq!(
            AgentEvent::from_json(&v),
            AgentEvent::Search { query: "rust".into() }
        );
    }

    #[test]
    fn decodes_page_open_item() {
        let v = json!({"type":"item.completed","item":{"item_type":"page_open","url":"https://a"}});
        assert_eq!(
            AgentEvent::from_json(&v),
            AgentEvent::PageOpen { url: "https://a".into() }
        );
    }

    #[test]
    fn decodes_turn_completed_usage() {
        let v = json!({"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":3}});
        match AgentEvent::from_json(&v) {
            AgentEvent::TurnCompleted { usage } => {
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.cached_input_tokens, 0);
                assert_eq!(usage.output_tokens, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_shapes_are_unrecognized() {
        assert_eq!(
            AgentEvent::from_json(&json!({"type":"thread.started","thread_id":"t1"})),
            AgentEvent::Unrecognized
        );
        assert_eq!(AgentEvent::from_json(&json!(42)), AgentEvent::Unrecognized);
    }

    #[test]
    fn item_type_is_extracted_independently() {
        let v = json!({"type":"item.completed","item":{"item_type":"command_execution","command":"ls"}});
        assert_eq!(item_type_of(&v).as_deref(), Some("command_execution"));
    }
}
