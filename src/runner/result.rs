// src/runner/result.rs

//! Final-artifact parsing, structural validation, and source normalization.

use serde::{Deserialize, Serialize};

use crate::config::model::SOURCES_HARD_CAP;

/// The structured result the agent writes as its final artifact.
///
/// `confidence` has no default on purpose: an artifact missing it fails to
/// deserialize and the run is classified as invalid structured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredResult {
    pub answer: String,
    pub as_of: String,
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl StructuredResult {
    /// Check the required-shape invariants the schema promises.
    ///
    /// The agent is not trusted to have honored the schema; every field is
    /// re-checked here.
    pub fn validate(&self) -> Result<(), String> {
        if self.answer.trim().is_empty() {
            return Err("answer is empty".to_string());
        }
        if self.as_of.trim().is_empty() {
            return Err("as_of is empty".to_string());
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        Ok(())
    }
}

/// Parse the raw artifact text into a validated result.
///
/// The artifact is one JSON object, optionally fenced in a markdown code
/// block. The error string is a human-readable reason used for diagnostics;
/// the caller maps any error to `invalid_structured_output`.
pub fn parse_structured_result(raw: &str) -> Result<StructuredResult, String> {
    let body = strip_code_fence(raw).trim();
    if body.is_empty() {
        return Err("artifact is empty".to_string());
    }

    let result: StructuredResult =
        serde_json::from_str(body).map_err(|e| format!("artifact is not a valid result: {e}"))?;
    result.validate()?;
    Ok(result)
}

/// Strip a surrounding markdown code fence (```json ... ``` or ``` ... ```),
/// if present. Anything else passes through untouched.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.split_once('\n').map(|(_, body)| body) else {
        return trimmed;
    };
    match rest.rfind("```") {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Normalize a source list: trim entries, keep only http/https URLs, drop
/// duplicates while preserving first-seen order, cap the count.
///
/// Applied regardless of what the agent emitted; `cap` is itself bounded by
/// the hard cap of 20.
pub fn normalize_sources(sources: &[String], cap: usize) -> Vec<String> {
    let cap = cap.clamp(1, SOURCES_HARD_CAP);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for source in sources {
        let url = source.trim();
        if url.is_empty() {
            continue;
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            continue;
        }
        if seen.insert(url.to_string()) {
            out.push(url.to_string());
            if out.len() == cap {
                break;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> &'static str {
        r#"{"answer":"42","as_of":"mid 2025","confidence":0.9,"sources":["https://a"],"notes":""}"#
    }

    #[test]
    fn parses_a_plain_artifact() {
        let r = parse_structured_result(valid_json()).unwrap();
        assert_eq!(r.answer, "42");
        assert_eq!(r.sources, vec!["https://a"]);
    }

    #[test]
    fn parses_a_fenced_artifact() {
        let fenced = format!("```json\n{}\n```\n", valid_json());
        let r = parse_structured_result(&fenced).unwrap();
        assert_eq!(r.as_of, "mid 2025");
    }

    #[test]
    fn missing_confidence_is_rejected() {
        let raw = r#"{"answer":"a","as_of":"b","sources":[],"notes":""}"#;
        assert!(parse_structured_result(raw).is_err());
    }

    #[test]
    fn blank_answer_or_as_of_is_rejected() {
        let raw = r#"{"answer":"  ","as_of":"b","confidence":0.5}"#;
        assert!(parse_structured_result(raw).is_err());
        let raw = r#"{"answer":"a","as_of":"","confidence":0.5}"#;
        assert!(parse_structured_result(raw).is_err());
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let raw = r#"{"answer":"a","as_of":"b","confidence":1.5}"#;
        assert!(parse_structured_result(raw).is_err());
        let raw = r#"{"answer":"a","as_of":"b","confidence":-0.1}"#;
        assert!(parse_structured_result(raw).is_err());
    }

    #[test]
    fn sources_are_deduped_filtered_and_order_preserving() {
        let raw: Vec<String> = ["https://a", "https://a", "http://b", "ftp://c", "not-a-url"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            normalize_sources(&raw, 10),
            vec!["https://a".to_string(), "http://b".to_string()]
        );
    }

    #[test]
    fn sources_are_capped() {
        let raw: Vec<String> = (0..30).map(|i| format!("https://site{i}.test")).collect();
        assert_eq!(normalize_sources(&raw, 3).len(), 3);
        // The requested cap never exceeds the hard cap.
        assert_eq!(normalize_sources(&raw, 99).len(), SOURCES_HARD_CAP);
    }
}
