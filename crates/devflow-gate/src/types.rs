use serde::{Deserialize, Serialize};

use devflow_utils::types::QualityIssue;

/// Outcome of one weighted check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub weight: f64,
    /// Check score in [0, 1] before weighting.
    pub score: f64,
    /// Observed value, for reports.
    pub detail: String,
}

/// Result of gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    /// Score reached the threshold and no issue is blocking.
    pub passed: bool,
    /// Weighted score in [0, 1].
    pub score: f64,
    pub threshold: f64,
    pub issues: Vec<QualityIssue>,
    pub checks: Vec<CheckResult>,
}

impl QualityResult {
    pub fn blocking_issues(&self) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(|i| i.is_blocking())
    }

    #[must_use]
    pub fn has_blocking(&self) -> bool {
        self.blocking_issues().next().is_some()
    }

    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let blocking = self.blocking_issues().count();
        format!(
            "{} (score {:.2}, threshold {:.2}, {} issue(s), {blocking} blocking)",
            if self.passed { "passed" } else { "failed" },
            self.score,
            self.threshold,
            self.issues.len(),
        )
    }
}
