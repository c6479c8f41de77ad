//! Self-correction: one corrective pass after a failed quality gate.
//!
//! The corrective pass reruns Implementation, TestGeneration, Validation,
//! and Documentation with the original implementation and the gate's
//! issues in context, then evaluates the gate again. There is no second
//! correction; the caller fails the task if the gate still fails.

use async_trait::async_trait;
use tracing::info;

use devflow_gate::{GateInput, QualityGate, QualityResult};
use devflow_phase_api::{CorrectionContext, PhaseContext};
use devflow_utils::error::{DevflowError, PhaseError};
use devflow_utils::types::PhaseId;

/// How a run over a list of phases ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Finished,
    /// Cancellation was observed between phases.
    Cancelled,
    /// A phase failed after its retry budget.
    Failed(PhaseError),
}

/// Executes phases in order, recording each one on the task.
#[async_trait]
pub trait PassRunner: Send {
    /// # Errors
    ///
    /// `System` if the task could not be persisted.
    async fn run_pass(
        &mut self,
        phases: &[PhaseId],
        ctx: &mut PhaseContext,
    ) -> Result<PassOutcome, DevflowError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionOutcome {
    Corrected(QualityResult),
    StillFailing {
        original: QualityResult,
        corrective: QualityResult,
    },
    Cancelled,
    /// A corrective phase failed; `original` is the gate result that
    /// triggered the correction.
    PhaseFailed {
        error: PhaseError,
        original: QualityResult,
    },
}

fn content_of(ctx: &PhaseContext, phase: PhaseId) -> &str {
    ctx.output(phase).map_or("", |o| o.content.as_str())
}

/// Run the gate over the implementation and tests currently in `ctx`.
#[must_use]
pub fn evaluate_context(gate: &QualityGate, ctx: &PhaseContext) -> QualityResult {
    let mut input = GateInput::new(
        content_of(ctx, PhaseId::Implementation),
        content_of(ctx, PhaseId::TestGeneration),
    )
    .with_requirements(&ctx.requirements);
    if let Some(report) = ctx
        .output(PhaseId::Validation)
        .and_then(|o| o.report.as_ref())
    {
        input = input.with_report(report);
    }
    gate.evaluate_input(&input)
}

pub struct SelfCorrectionController<'a> {
    gate: &'a QualityGate,
}

impl<'a> SelfCorrectionController<'a> {
    #[must_use]
    pub fn new(gate: &'a QualityGate) -> Self {
        Self { gate }
    }

    /// Corrective context: the implementation that failed and every issue
    /// the gate reported against it.
    #[must_use]
    pub fn corrective_context(ctx: &PhaseContext, failed: &QualityResult) -> CorrectionContext {
        CorrectionContext {
            original_implementation: ctx
                .output(PhaseId::Implementation)
                .map(|o| o.content.clone())
                .unwrap_or_default(),
            issues: failed.issues.clone(),
        }
    }

    /// Run the corrective pass and re-evaluate.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures from the runner.
    pub async fn correct<R>(
        &self,
        runner: &mut R,
        ctx: &mut PhaseContext,
        failed: QualityResult,
    ) -> Result<CorrectionOutcome, DevflowError>
    where
        R: PassRunner + ?Sized,
    {
        ctx.begin_correction(Self::corrective_context(ctx, &failed));
        info!(
            task_id = %ctx.task_id,
            issues = failed.issues.len(),
            score = failed.score,
            "Starting self-correction pass"
        );

        match runner.run_pass(&PhaseId::CORRECTION_SEQUENCE, ctx).await? {
            PassOutcome::Finished => {}
            PassOutcome::Cancelled => return Ok(CorrectionOutcome::Cancelled),
            PassOutcome::Failed(error) => {
                return Ok(CorrectionOutcome::PhaseFailed {
                    error,
                    original: failed,
                });
            }
        }

        let corrective = evaluate_context(self.gate, ctx);
        info!(task_id = %ctx.task_id, result = %corrective.summary(), "Corrective quality gate evaluated");
        if corrective.passed {
            Ok(CorrectionOutcome::Corrected(corrective))
        } else {
            Ok(CorrectionOutcome::StillFailing {
                original: failed,
                corrective,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_phase_api::PhaseOutput;
    use devflow_utils::test_support::{
        BROKEN_IMPLEMENTATION, CLEAN_IMPLEMENTATION, CLEAN_TESTS, MISSING_TESTS,
    };
    use devflow_utils::types::{PhasePass, Priority, Requirements, TaskId};

    /// Replays canned outputs for each phase it is asked to run.
    struct CannedRunner {
        implementation: &'static str,
        tests: &'static str,
        ran: Vec<(PhaseId, PhasePass)>,
        outcome: Option<PassOutcome>,
    }

    #[async_trait]
    impl PassRunner for CannedRunner {
        async fn run_pass(
            &mut self,
            phases: &[PhaseId],
            ctx: &mut PhaseContext,
        ) -> Result<PassOutcome, DevflowError> {
            if let Some(outcome) = self.outcome.take() {
                return Ok(outcome);
            }
            for phase in phases {
                self.ran.push((*phase, ctx.pass));
                let content = match phase {
                    PhaseId::Implementation => self.implementation.to_string(),
                    PhaseId::TestGeneration => self.tests.to_string(),
                    other => format!("{} output", other.label()),
                };
                ctx.record_output(PhaseOutput::new(*phase, content));
            }
            Ok(PassOutcome::Finished)
        }
    }

    fn failing_ctx() -> PhaseContext {
        let mut ctx = PhaseContext::new(
            TaskId::new("t-1"),
            "Add helpers",
            "",
            Priority::Medium,
            Requirements::None,
        );
        ctx.record_output(PhaseOutput::new(PhaseId::Implementation, CLEAN_IMPLEMENTATION));
        ctx.record_output(PhaseOutput::new(PhaseId::TestGeneration, MISSING_TESTS));
        ctx
    }

    fn runner(implementation: &'static str, tests: &'static str) -> CannedRunner {
        CannedRunner {
            implementation,
            tests,
            ran: Vec::new(),
            outcome: None,
        }
    }

    #[tokio::test]
    async fn corrected_pass_reruns_four_phases_and_passes() {
        let gate = QualityGate::default();
        let mut ctx = failing_ctx();
        let failed = evaluate_context(&gate, &ctx);
        assert!(!failed.passed);

        let mut runner = runner(CLEAN_IMPLEMENTATION, CLEAN_TESTS);
        let outcome = SelfCorrectionController::new(&gate)
            .correct(&mut runner, &mut ctx, failed.clone())
            .await
            .unwrap();

        assert!(matches!(outcome, CorrectionOutcome::Corrected(ref r) if r.passed));
        let phases: Vec<PhaseId> = runner.ran.iter().map(|(p, _)| *p).collect();
        assert_eq!(phases, PhaseId::CORRECTION_SEQUENCE.to_vec());
        assert!(runner.ran.iter().all(|(_, pass)| *pass == PhasePass::SelfCorrection));

        let correction = ctx.correction.as_ref().unwrap();
        assert_eq!(correction.original_implementation, CLEAN_IMPLEMENTATION);
        assert_eq!(correction.issues, failed.issues);
    }

    #[tokio::test]
    async fn second_failure_reports_both_results() {
        let gate = QualityGate::default();
        let mut ctx = failing_ctx();
        let failed = evaluate_context(&gate, &ctx);

        let mut runner = runner(BROKEN_IMPLEMENTATION, MISSING_TESTS);
        let outcome = SelfCorrectionController::new(&gate)
            .correct(&mut runner, &mut ctx, failed.clone())
            .await
            .unwrap();

        match outcome {
            CorrectionOutcome::StillFailing {
                original,
                corrective,
            } => {
                assert_eq!(original, failed);
                assert!(!corrective.passed);
                assert!(corrective.has_blocking());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupted_pass_skips_reevaluation() {
        let gate = QualityGate::default();
        let mut ctx = failing_ctx();
        let failed = evaluate_context(&gate, &ctx);

        let mut cancelled = runner(CLEAN_IMPLEMENTATION, CLEAN_TESTS);
        cancelled.outcome = Some(PassOutcome::Cancelled);
        let outcome = SelfCorrectionController::new(&gate)
            .correct(&mut cancelled, &mut ctx, failed.clone())
            .await
            .unwrap();
        assert_eq!(outcome, CorrectionOutcome::Cancelled);

        let err = PhaseError::NonRetryable {
            phase: PhaseId::Implementation,
            reason: "401".into(),
        };
        let mut broken = runner(CLEAN_IMPLEMENTATION, CLEAN_TESTS);
        broken.outcome = Some(PassOutcome::Failed(err.clone()));
        let outcome = SelfCorrectionController::new(&gate)
            .correct(&mut broken, &mut ctx, failed.clone())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CorrectionOutcome::PhaseFailed {
                error: err,
                original: failed,
            }
        );
    }
}
