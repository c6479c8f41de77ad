use serde::{Deserialize, Serialize};
use std::fmt;

use devflow_utils::error::PhaseError;
use devflow_utils::types::{PhaseId, QualityIssue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A phase exhausted its retry budget or failed non-retryably.
    PhaseExecution,
    /// The quality gate failed and self-correction did not recover it.
    SelfCorrection,
}

/// Why a task failed. Always names the phase that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub phase: PhaseId,
    pub message: String,
    /// Gate issues of the initial pass (self-correction failures only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub original_issues: Vec<QualityIssue>,
    /// Gate issues after the corrective pass (self-correction failures only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrective_issues: Vec<QualityIssue>,
}

impl FailureReason {
    #[must_use]
    pub fn phase_execution(error: &PhaseError) -> Self {
        Self {
            kind: FailureKind::PhaseExecution,
            phase: error.phase(),
            message: error.to_string(),
            original_issues: Vec::new(),
            corrective_issues: Vec::new(),
        }
    }

    /// The gate failed again after the corrective pass.
    #[must_use]
    pub fn self_correction(
        original: Vec<QualityIssue>,
        corrective: Vec<QualityIssue>,
        score: f64,
        threshold: f64,
    ) -> Self {
        let blocking = corrective.iter().filter(|i| i.is_blocking()).count();
        Self {
            kind: FailureKind::SelfCorrection,
            phase: PhaseId::Validation,
            message: format!(
                "quality gate failed after self-correction (score {score:.2}, threshold \
                 {threshold:.2}; {} issue(s), {blocking} blocking)",
                corrective.len()
            ),
            original_issues: original,
            corrective_issues: corrective,
        }
    }

    /// A corrective phase failed after the initial quality gate had failed.
    #[must_use]
    pub fn correction_phase(error: &PhaseError, original: Vec<QualityIssue>) -> Self {
        Self {
            kind: FailureKind::SelfCorrection,
            phase: error.phase(),
            message: format!("self-correction aborted after quality gate failure: {error}"),
            original_issues: original,
            corrective_issues: Vec::new(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase '{}' failed: {}", self.phase, self.message)?;
        if !self.original_issues.is_empty() {
            write!(f, "; original issues: ")?;
            write_issues(f, &self.original_issues)?;
        }
        if !self.corrective_issues.is_empty() {
            write!(f, "; after correction: ")?;
            write_issues(f, &self.corrective_issues)?;
        }
        Ok(())
    }
}

fn write_issues(f: &mut fmt::Formatter<'_>, issues: &[QualityIssue]) -> fmt::Result {
    for (i, issue) in issues.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{issue}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_execution_names_the_phase() {
        let reason = FailureReason::phase_execution(&PhaseError::RetriesExhausted {
            phase: PhaseId::Architecture,
            attempts: 3,
            last_error: "transport reset".into(),
        });
        assert_eq!(reason.phase, PhaseId::Architecture);
        let text = reason.to_string();
        assert!(text.starts_with("phase 'architecture' failed:"));
        assert!(text.contains("transport reset"));
    }

    #[test]
    fn self_correction_lists_both_issue_sets() {
        let reason = FailureReason::self_correction(
            vec![QualityIssue::blocking("tests_present", "missing tests")],
            vec![QualityIssue::blocking("structural_validity", "unbalanced braces")],
            0.4,
            0.9,
        );
        let text = reason.to_string();
        assert!(text.contains("phase 'validation' failed"));
        assert!(text.contains("missing tests"));
        assert!(text.contains("unbalanced braces"));
        assert_eq!(reason.kind, FailureKind::SelfCorrection);
    }

    #[test]
    fn score_only_failure_reports_score_and_threshold() {
        let reason = FailureReason::self_correction(Vec::new(), Vec::new(), 0.62, 0.9);
        let text = reason.to_string();
        assert!(text.contains("score 0.62"), "{text}");
        assert!(text.contains("threshold 0.90"), "{text}");
        assert!(reason.corrective_issues.is_empty());
    }

    #[test]
    fn correction_phase_failure_keeps_gate_issues() {
        let error = PhaseError::NonRetryable {
            phase: PhaseId::Implementation,
            reason: "Provider authentication error: 401".into(),
        };
        let reason = FailureReason::correction_phase(
            &error,
            vec![QualityIssue::blocking("tests_present", "missing tests")],
        );
        assert_eq!(reason.kind, FailureKind::SelfCorrection);
        assert_eq!(reason.phase, PhaseId::Implementation);
        assert_eq!(reason.original_issues.len(), 1);
        let text = reason.to_string();
        assert!(text.contains("quality gate failure"), "{text}");
        assert!(text.contains("401"), "{text}");
        assert!(text.contains("original issues: [blocking] tests_present: missing tests"), "{text}");
    }
}
