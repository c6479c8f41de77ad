//! Phase trait system for the development pipeline.
//!
//! This crate is the shared contract between the orchestrator and the phase
//! implementations: the [`Phase`] trait, the [`PhaseContext`] a phase reads,
//! and the [`PhaseOutput`] it produces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use devflow_utils::canonicalization::content_hash;
use devflow_utils::error::PhaseError;
pub use devflow_utils::types::PhaseId;
use devflow_utils::types::{
    PhasePass, Priority, QualityIssue, Requirements, TaskId, ValidationReport,
};

/// What a corrective pass knows about the failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionContext {
    pub original_implementation: String,
    pub issues: Vec<QualityIssue>,
}

/// Everything a phase may read while building its prompt.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub task_id: TaskId,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub requirements: Requirements,
    pub pass: PhasePass,
    /// Latest output of every phase that has completed so far.
    pub outputs: BTreeMap<PhaseId, PhaseOutput>,
    /// Present only during the self-correction pass.
    pub correction: Option<CorrectionContext>,
}

impl PhaseContext {
    pub fn new(
        task_id: TaskId,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        requirements: Requirements,
    ) -> Self {
        Self {
            task_id,
            title: title.into(),
            description: description.into(),
            priority,
            requirements,
            pass: PhasePass::Initial,
            outputs: BTreeMap::new(),
            correction: None,
        }
    }

    #[must_use]
    pub fn output(&self, phase: PhaseId) -> Option<&PhaseOutput> {
        self.outputs.get(&phase)
    }

    /// Store a phase's output, replacing any earlier output of that phase.
    pub fn record_output(&mut self, output: PhaseOutput) {
        self.outputs.insert(output.phase, output);
    }

    /// Switch to the corrective pass.
    pub fn begin_correction(&mut self, correction: CorrectionContext) {
        self.pass = PhasePass::SelfCorrection;
        self.correction = Some(correction);
    }
}

/// Parsed result of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub phase: PhaseId,
    pub content: String,
    /// Confidence in [0, 1], when the response carried one.
    pub confidence: Option<f64>,
    pub summary: Option<String>,
    /// Findings reported by the validation phase.
    pub report: Option<ValidationReport>,
    pub content_hash: String,
}

impl PhaseOutput {
    pub fn new(phase: PhaseId, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            phase,
            content_hash: content_hash(&content),
            content,
            confidence: None,
            summary: None,
            report: None,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn with_report(mut self, report: ValidationReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// Core trait that every pipeline phase implements.
///
/// Execution is split into three steps so the orchestrator owns the
/// collaborator call: `prompt()` and `context()` build the request,
/// `postprocess()` turns the raw response into a [`PhaseOutput`].
pub trait Phase: Send + Sync {
    fn id(&self) -> PhaseId;

    /// Phases whose outputs this phase reads; they must have completed.
    fn deps(&self) -> &'static [PhaseId];

    fn prompt(&self, ctx: &PhaseContext) -> String;

    /// Context sent alongside the prompt: the outputs of [`Phase::deps`].
    ///
    /// # Errors
    ///
    /// `DependencyNotSatisfied` if a dependency has no output yet.
    fn context(&self, ctx: &PhaseContext) -> Result<String, PhaseError> {
        let mut sections = Vec::with_capacity(self.deps().len());
        for dep in self.deps() {
            let output = ctx
                .output(*dep)
                .ok_or(PhaseError::DependencyNotSatisfied {
                    phase: self.id(),
                    dependency: *dep,
                })?;
            sections.push(format!("## {} output\n\n{}", dep.label(), output.content.trim()));
        }
        Ok(sections.join("\n\n"))
    }

    /// # Errors
    ///
    /// `MalformedOutput` if the response cannot be interpreted.
    fn postprocess(&self, raw: &str, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError>;
}
