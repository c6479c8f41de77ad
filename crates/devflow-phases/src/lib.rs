//! Concrete implementations of the pipeline phases.
//!
//! Each phase is a unit struct implementing [`Phase`]. [`phase_impl`] maps a
//! [`PhaseId`] to its implementation with an exhaustive match, so adding a
//! phase without an implementation does not compile.

mod parse;
mod prompt;

use std::fmt::Write as _;

use devflow_phase_api::{Phase, PhaseContext, PhaseOutput};
use devflow_utils::error::PhaseError;
use devflow_utils::types::{PhaseId, SECURITY_CATEGORY};

pub use parse::parse_response;
use prompt::{RESPONSE_FORMAT, VALIDATION_FORMAT, task_brief};

/// The implementation of a phase.
#[must_use]
pub fn phase_impl(id: PhaseId) -> &'static dyn Phase {
    match id {
        PhaseId::Analysis => &AnalysisPhase,
        PhaseId::Architecture => &ArchitecturePhase,
        PhaseId::Implementation => &ImplementationPhase,
        PhaseId::TestGeneration => &TestGenerationPhase,
        PhaseId::Validation => &ValidationPhase,
        PhaseId::Documentation => &DocumentationPhase,
    }
}

/// Requirement analysis and scoping.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisPhase;

impl Phase for AnalysisPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Analysis
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[]
    }

    fn prompt(&self, ctx: &PhaseContext) -> String {
        format!(
            r"You are a senior engineer scoping a development task.

{}
# Your Task

Analyze the task. Identify the functional scope, inputs and outputs, edge
cases, error conditions, and any security controls the requirements call for.
State assumptions explicitly.{RESPONSE_FORMAT}",
            task_brief(ctx)
        )
    }

    fn postprocess(&self, raw: &str, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        parse_response(self.id(), raw)
    }
}

/// Component and interface design.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchitecturePhase;

impl Phase for ArchitecturePhase {
    fn id(&self) -> PhaseId {
        PhaseId::Architecture
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Analysis]
    }

    fn prompt(&self, ctx: &PhaseContext) -> String {
        format!(
            r"You are a software architect.

{}
# Your Task

Using the analysis provided as context, design the solution: modules and
their responsibilities, public functions with signatures, data types, and
error handling. Keep the design minimal for the scope.{RESPONSE_FORMAT}",
            task_brief(ctx)
        )
    }

    fn postprocess(&self, raw: &str, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        parse_response(self.id(), raw)
    }
}

/// Code generation. During self-correction the prompt carries the original
/// implementation and the issues the quality gate found.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImplementationPhase;

impl ImplementationPhase {
    fn correction_section(ctx: &PhaseContext) -> String {
        let Some(correction) = &ctx.correction else {
            return String::new();
        };
        let mut section = String::from(
            "\n# Correction Required\n\nA previous implementation failed quality checks. Fix every issue below and return the complete corrected implementation.\n\n## Issues\n\n",
        );
        for issue in &correction.issues {
            let _ = writeln!(section, "- {issue}");
        }
        let _ = write!(
            section,
            "\n## Previous Implementation\n\n```\n{}\n```\n",
            correction.original_implementation.trim_end()
        );
        section
    }

    fn security_section(ctx: &PhaseContext) -> String {
        let controls = ctx.requirements.category(SECURITY_CATEGORY);
        if controls.is_empty() {
            return String::new();
        }
        let mut section =
            String::from("\n# Security Controls\n\nImplement and name each control in the code:\n");
        for control in controls {
            let _ = writeln!(section, "- {control}");
        }
        section
    }
}

impl Phase for ImplementationPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Implementation
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Analysis, PhaseId::Architecture]
    }

    fn prompt(&self, ctx: &PhaseContext) -> String {
        format!(
            r"You are an expert developer implementing a design.

{}{}{}
# Your Task

Implement the design provided as context. Return complete, compilable source
code only, with no placeholders.{RESPONSE_FORMAT}",
            task_brief(ctx),
            Self::security_section(ctx),
            Self::correction_section(ctx),
        )
    }

    fn postprocess(&self, raw: &str, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        parse_response(self.id(), raw)
    }
}

/// Test generation for the implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestGenerationPhase;

impl Phase for TestGenerationPhase {
    fn id(&self) -> PhaseId {
        PhaseId::TestGeneration
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Implementation]
    }

    fn prompt(&self, ctx: &PhaseContext) -> String {
        format!(
            r"You are a test engineer.

{}
# Your Task

Write unit tests for the implementation provided as context. Exercise every
public function, including edge cases and error paths.{RESPONSE_FORMAT}",
            task_brief(ctx)
        )
    }

    fn postprocess(&self, raw: &str, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        parse_response(self.id(), raw)
    }
}

/// Review of implementation and tests; its report feeds the quality gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPhase;

impl Phase for ValidationPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Validation
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Implementation, PhaseId::TestGeneration]
    }

    fn prompt(&self, ctx: &PhaseContext) -> String {
        format!(
            r"You are a code reviewer.

{}
# Your Task

Review the implementation and tests provided as context against the
requirements. Check correctness, test adequacy, and security controls.{RESPONSE_FORMAT}{VALIDATION_FORMAT}",
            task_brief(ctx)
        )
    }

    fn postprocess(&self, raw: &str, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        parse_response(self.id(), raw)
    }
}

/// User and API documentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentationPhase;

impl Phase for DocumentationPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Documentation
    }

    fn deps(&self) -> &'static [PhaseId] {
        &[PhaseId::Architecture, PhaseId::Implementation]
    }

    fn prompt(&self, ctx: &PhaseContext) -> String {
        format!(
            r"You are a technical writer.

{}
# Your Task

Document the implementation provided as context: purpose, public API with
examples, and error behavior, in Markdown.{RESPONSE_FORMAT}",
            task_brief(ctx)
        )
    }

    fn postprocess(&self, raw: &str, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        parse_response(self.id(), raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_phase_api::CorrectionContext;
    use devflow_utils::test_support::sample_spec;
    use devflow_utils::types::{QualityIssue, Requirements, TaskId};

    fn ctx() -> PhaseContext {
        let spec = sample_spec("acme");
        PhaseContext::new(
            TaskId::new("t-1"),
            spec.title,
            spec.description,
            spec.priority,
            spec.requirements,
        )
    }

    #[test]
    fn every_phase_maps_to_its_implementation() {
        for id in PhaseId::all() {
            assert_eq!(phase_impl(id).id(), id);
        }
    }

    #[test]
    fn dependencies_precede_the_phase() {
        for id in PhaseId::all() {
            for dep in phase_impl(id).deps() {
                assert!(dep.index() < id.index(), "{dep} must run before {id}");
            }
        }
    }

    #[test]
    fn context_visibility_matches_pipeline() {
        assert_eq!(
            phase_impl(PhaseId::Implementation).deps(),
            &[PhaseId::Analysis, PhaseId::Architecture]
        );
        assert_eq!(
            phase_impl(PhaseId::TestGeneration).deps(),
            &[PhaseId::Implementation]
        );
        assert_eq!(
            phase_impl(PhaseId::Validation).deps(),
            &[PhaseId::Implementation, PhaseId::TestGeneration]
        );
    }

    #[test]
    fn prompt_includes_brief_and_format() {
        let prompt = phase_impl(PhaseId::Analysis).prompt(&ctx());
        assert!(prompt.contains("Title: Add arithmetic helpers"));
        assert!(prompt.contains("### functional"));
        assert!(prompt.contains("- add two integers"));
        assert!(prompt.contains("# Response Format"));
    }

    #[test]
    fn explicit_no_requirements_is_stated() {
        let mut ctx = ctx();
        ctx.requirements = Requirements::None;
        assert!(phase_impl(PhaseId::Analysis).prompt(&ctx).contains("No explicit requirements"));
    }

    #[test]
    fn correction_prompt_carries_issues_and_original() {
        let mut ctx = ctx();
        ctx.begin_correction(CorrectionContext {
            original_implementation: "fn add(a: i32) {".into(),
            issues: vec![QualityIssue::blocking("structural_validity", "unbalanced delimiters")],
        });
        let prompt = phase_impl(PhaseId::Implementation).prompt(&ctx);
        assert!(prompt.contains("# Correction Required"));
        assert!(prompt.contains("[blocking] structural_validity: unbalanced delimiters"));
        assert!(prompt.contains("fn add(a: i32) {"));

        let initial = phase_impl(PhaseId::Implementation).prompt(&self::ctx());
        assert!(!initial.contains("# Correction Required"));
    }

    #[test]
    fn security_controls_are_listed_for_implementation() {
        let spec = sample_spec("acme").with_requirement(SECURITY_CATEGORY, ["input validation"]);
        let ctx = PhaseContext::new(
            TaskId::new("t-2"),
            spec.title,
            spec.description,
            spec.priority,
            spec.requirements,
        );
        let prompt = phase_impl(PhaseId::Implementation).prompt(&ctx);
        assert!(prompt.contains("# Security Controls"));
        assert!(prompt.contains("- input validation"));
    }

    #[test]
    fn validation_prompt_asks_for_issues() {
        assert!(phase_impl(PhaseId::Validation).prompt(&ctx()).contains("\"issues\""));
    }
}
