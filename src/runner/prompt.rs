// src/runner/prompt.rs

//! Prompt construction and the structured-output schema sent to the agent.

use serde_json::{json, Value};

use crate::cli::Period;
use crate::config::model::SOURCES_HARD_CAP;

/// JSON schema the agent is asked to honor for its final artifact.
pub fn result_schema_value() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "answer": { "type": "string" },
            "as_of": { "type": "string" },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "sources": {
                "type": "array",
                "items": { "type": "string" },
                "maxItems": SOURCES_HARD_CAP
            },
            "notes": { "type": "string" }
        },
        "required": ["answer", "as_of", "confidence", "sources", "notes"]
    })
}

/// Build the research prompt for one question.
///
/// The time-framing parameters anchor the answer to a point in the reference
/// year so the agent does not silently answer for "now".
pub fn build_prompt(question: &str, period: Period, year: i32, max_sources: usize) -> String {
    format!(
        "Research the following question using web search and report your findings.\n\
         \n\
         Question: {question}\n\
         \n\
         Frame the answer as of {period} {year}. State the effective date you \
         answered for in the `as_of` field. Cite at most {max_sources} source \
         URLs, most load-bearing first. Set `confidence` between 0 and 1 based \
         on how well the sources agree. Put caveats in `notes`.\n\
         \n\
         Respond with a single JSON object matching the provided output schema.",
        question = question.trim(),
        period = period.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_all_result_fields() {
        let schema = result_schema_value();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        for field in ["answer", "as_of", "confidence", "sources", "notes"] {
            assert!(required.contains(&field), "missing required field {field}");
        }
    }

    #[test]
    fn prompt_carries_question_and_framing() {
        let p = build_prompt("  who won?  ", Period::Late, 2025, 5);
        assert!(p.contains("Question: who won?"));
        assert!(p.contains("late 2025"));
        assert!(p.contains("at most 5 source"));
    }
}
