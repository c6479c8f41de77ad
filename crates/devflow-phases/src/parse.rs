//! Structured-response parsing shared by every phase.
//!
//! Accepted shapes, tried in order:
//! 1. a JSON envelope `{content, confidence?, summary?, issues?}`, bare or in
//!    a ```` ```json ```` fence;
//! 2. for code phases, one or more fenced code blocks;
//! 3. for text phases, the trimmed response text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use devflow_phase_api::PhaseOutput;
use devflow_utils::error::PhaseError;
use devflow_utils::types::{PhaseId, ValidationReport};

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+.-]*)[ \t]*\r?\n(.*?)```").expect("static regex")
});

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    content: String,
    confidence: Option<f64>,
    summary: Option<String>,
    #[serde(default)]
    issues: Option<ValidationReport>,
}

fn malformed(phase: PhaseId, reason: impl Into<String>) -> PhaseError {
    PhaseError::MalformedOutput {
        phase,
        reason: reason.into(),
    }
}

/// Locate a JSON envelope: the whole response, or a `json` fence.
fn envelope_source(raw: &str) -> Option<&str> {
    if raw.starts_with('{') {
        return Some(raw);
    }
    FENCE
        .captures_iter(raw)
        .find(|c| c.get(1).is_some_and(|lang| lang.as_str().eq_ignore_ascii_case("json")))
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim())
}

fn code_blocks(raw: &str) -> Vec<&str> {
    FENCE
        .captures_iter(raw)
        .filter_map(|c| c.get(2))
        .map(|m| m.as_str().trim_end())
        .filter(|block| !block.trim().is_empty())
        .collect()
}

/// Parse a raw completion into a [`PhaseOutput`].
///
/// # Errors
///
/// `MalformedOutput` for empty responses, invalid envelopes, confidence
/// outside [0, 1], or code phases without any code.
pub fn parse_response(phase: PhaseId, raw: &str) -> Result<PhaseOutput, PhaseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(malformed(phase, "empty response"));
    }

    if let Some(source) = envelope_source(trimmed) {
        let envelope: Envelope = serde_json::from_str(source)
            .map_err(|e| malformed(phase, format!("invalid response envelope: {e}")))?;
        return from_envelope(phase, envelope);
    }

    let content = if phase.produces_code() {
        let blocks = code_blocks(trimmed);
        if blocks.is_empty() {
            return Err(malformed(phase, "response contains no code block"));
        }
        blocks.join("\n\n")
    } else {
        trimmed.to_string()
    };
    Ok(PhaseOutput::new(phase, content))
}

fn from_envelope(phase: PhaseId, envelope: Envelope) -> Result<PhaseOutput, PhaseError> {
    let mut content = envelope.content.trim().to_string();
    if content.is_empty() {
        return Err(malformed(phase, "envelope content is empty"));
    }
    // Models sometimes fence code inside the envelope as well.
    if phase.produces_code() {
        let blocks = code_blocks(&content);
        if !blocks.is_empty() {
            content = blocks.join("\n\n");
        }
    }

    let mut output = PhaseOutput::new(phase, content);
    if let Some(confidence) = envelope.confidence {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(malformed(
                phase,
                format!("confidence {confidence} is outside [0, 1]"),
            ));
        }
        output = output.with_confidence(confidence);
    }
    if let Some(summary) = envelope.summary.filter(|s| !s.trim().is_empty()) {
        output = output.with_summary(summary);
    }
    if let Some(report) = envelope.issues {
        output = output.with_report(report);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_utils::test_support::{CLEAN_IMPLEMENTATION, envelope};

    #[test]
    fn bare_envelope_is_parsed() {
        let raw = envelope(CLEAN_IMPLEMENTATION, 0.9);
        let output = parse_response(PhaseId::Implementation, &raw).unwrap();
        assert_eq!(output.content, CLEAN_IMPLEMENTATION.trim());
        assert_eq!(output.confidence, Some(0.9));
    }

    #[test]
    fn fenced_envelope_is_parsed_with_issues() {
        let raw = "Review done.\n```json\n{\"content\": \"looks fine\", \"confidence\": 0.8, \"issues\": {\"blocking\": [\"no input validation\"]}}\n```\n";
        let output = parse_response(PhaseId::Validation, raw).unwrap();
        assert_eq!(output.content, "looks fine");
        let report = output.report.unwrap();
        assert_eq!(report.blocking, vec!["no input validation".to_string()]);
        assert!(report.advisory.is_empty());
    }

    #[test]
    fn code_phase_accepts_fenced_blocks() {
        let raw = "Here you go:\n```rust\nfn a() {}\n```\nand\n```rust\nfn b() {}\n```";
        let output = parse_response(PhaseId::Implementation, raw).unwrap();
        assert_eq!(output.content, "fn a() {}\n\nfn b() {}");
        assert_eq!(output.confidence, None);
    }

    #[test]
    fn code_phase_without_code_is_malformed() {
        let err = parse_response(PhaseId::TestGeneration, "I could not write tests.").unwrap_err();
        assert!(matches!(err, PhaseError::MalformedOutput { phase: PhaseId::TestGeneration, .. }));
    }

    #[test]
    fn text_phase_accepts_plain_text() {
        let output = parse_response(PhaseId::Analysis, "  Scope: helpers.  \n").unwrap();
        assert_eq!(output.content, "Scope: helpers.");
    }

    #[test]
    fn confidence_out_of_range_is_malformed() {
        let raw = envelope("text", 1.5);
        assert!(parse_response(PhaseId::Documentation, &raw).is_err());
    }

    #[test]
    fn empty_and_broken_responses_are_malformed() {
        assert!(parse_response(PhaseId::Analysis, "   ").is_err());
        assert!(parse_response(PhaseId::Analysis, "{\"content\": ").is_err());
        assert!(parse_response(PhaseId::Analysis, "{\"content\": \"  \"}").is_err());
    }

    #[test]
    fn fenced_code_inside_envelope_is_unwrapped() {
        let raw = envelope("```rust\nfn a() {}\n```", 0.7);
        let output = parse_response(PhaseId::Implementation, &raw).unwrap();
        assert_eq!(output.content, "fn a() {}");
    }
}
