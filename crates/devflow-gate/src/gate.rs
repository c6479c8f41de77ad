use devflow_config::Config;
use devflow_utils::types::{QualityIssue, Requirements, SECURITY_CATEGORY, ValidationReport};

use crate::checks::{self, Outcome, WEIGHTS};
use crate::policy::GatePolicy;
use crate::types::{CheckResult, QualityResult};

/// Artifacts evaluated by the gate.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub implementation: &'a str,
    pub tests: &'a str,
    pub requirements: Option<&'a Requirements>,
    pub report: Option<&'a ValidationReport>,
}

impl<'a> GateInput<'a> {
    #[must_use]
    pub fn new(implementation: &'a str, tests: &'a str) -> Self {
        Self {
            implementation,
            tests,
            requirements: None,
            report: None,
        }
    }

    #[must_use]
    pub fn with_requirements(mut self, requirements: &'a Requirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    #[must_use]
    pub fn with_report(mut self, report: &'a ValidationReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// Deterministic scorer for implementation + tests.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    policy: GatePolicy,
}

impl QualityGate {
    #[must_use]
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(GatePolicy::from_config(config))
    }

    #[must_use]
    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Score an implementation and its tests with no further context.
    #[must_use]
    pub fn evaluate(&self, implementation: &str, tests: &str) -> QualityResult {
        self.evaluate_input(&GateInput::new(implementation, tests))
    }

    /// Score with requirements (security controls) and the validation
    /// phase's report folded in.
    #[must_use]
    pub fn evaluate_input(&self, input: &GateInput<'_>) -> QualityResult {
        let tests_present = checks::tests_present(input.tests, &self.policy);
        let tests_found = tests_present.score > 0.0;
        let outcomes = [
            tests_present,
            checks::estimated_coverage(input.implementation, input.tests, tests_found, &self.policy),
            checks::structural_validity(input.implementation, input.tests),
            checks::placeholders(input.implementation),
        ];

        let mut score = 0.0;
        let mut issues: Vec<QualityIssue> = Vec::new();
        let mut results = Vec::with_capacity(outcomes.len());
        for ((name, weight), Outcome { score: s, detail, issues: found }) in
            WEIGHTS.iter().copied().zip(outcomes)
        {
            score += weight * s;
            issues.extend(found);
            results.push(CheckResult {
                name: name.to_string(),
                weight,
                score: s,
                detail,
            });
        }

        if let Some(requirements) = input.requirements {
            issues.extend(checks::security_controls(
                input.implementation,
                requirements.category(SECURITY_CATEGORY),
            ));
        }
        if let Some(report) = input.report {
            issues.extend(report.issues());
        }

        // Rounded so that equal inputs compare equal across platforms.
        let score = (score.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0;
        let passed = score >= self.policy.threshold && !issues.iter().any(QualityIssue::is_blocking);

        QualityResult {
            passed,
            score,
            threshold: self.policy.threshold,
            issues,
            checks: results,
        }
    }
}
