//! The per-task worker: initial pass, quality gate, optional correction,
//! terminal transition.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use devflow_phase_api::PhaseContext;
use devflow_phases::phase_impl;
use devflow_task::{DeliverableRef, Deliverables, FailureReason, Task};
use devflow_utils::error::DevflowError;
use devflow_utils::types::{PhaseId, TaskStatus};

use crate::executor::PhaseRun;
use crate::handle::TaskHandle;
use crate::notify::TaskEvent;
use crate::orchestrator::Inner;
use crate::self_correction::{
    CorrectionOutcome, PassOutcome, PassRunner, SelfCorrectionController, evaluate_context,
};

pub(crate) struct Worker {
    inner: Arc<Inner>,
    handle: Arc<TaskHandle>,
}

impl Worker {
    pub(crate) fn new(inner: Arc<Inner>, handle: Arc<TaskHandle>) -> Self {
        Self { inner, handle }
    }

    /// Drive a running task to a terminal state.
    pub(crate) async fn drive(mut self) -> Result<Arc<Task>, DevflowError> {
        let task = self.handle.snapshot();
        let mut ctx = PhaseContext::new(
            task.id.clone(),
            task.title.clone(),
            task.description.clone(),
            task.priority,
            task.requirements.clone(),
        );

        match self.run_pass(&PhaseId::SEQUENCE, &mut ctx).await? {
            PassOutcome::Finished => {}
            PassOutcome::Cancelled => return Ok(self.cancelled()),
            PassOutcome::Failed(err) => {
                return self.fail(FailureReason::phase_execution(&err), None).await;
            }
        }

        let result = evaluate_context(&self.inner.gate, &ctx);
        info!(task_id = %task.id, result = %result.summary(), "Quality gate evaluated");
        if result.passed {
            return self.complete(&ctx, result.score).await;
        }

        if self.cancel_requested() {
            return Ok(self.cancelled());
        }
        if self
            .commit(|t| t.begin_self_correction())
            .await?
            .is_none()
        {
            return Ok(self.cancelled());
        }
        self.inner
            .tracker
            .set_status(&task.id, TaskStatus::SelfCorrecting, "Self-correction");

        let inner = Arc::clone(&self.inner);
        match SelfCorrectionController::new(&inner.gate)
            .correct(&mut self, &mut ctx, result)
            .await?
        {
            CorrectionOutcome::Corrected(result) => self.complete(&ctx, result.score).await,
            CorrectionOutcome::StillFailing {
                original,
                corrective,
            } => {
                let score = corrective.score;
                let reason = FailureReason::self_correction(
                    original.issues,
                    corrective.issues,
                    score,
                    corrective.threshold,
                );
                self.fail(reason, Some(score)).await
            }
            CorrectionOutcome::Cancelled => Ok(self.cancelled()),
            CorrectionOutcome::PhaseFailed { error, original } => {
                let score = original.score;
                let reason = FailureReason::correction_phase(&error, original.issues);
                self.fail(reason, Some(score)).await
            }
        }
    }

    fn cancel_requested(&self) -> bool {
        self.handle.cancel_token().is_cancelled()
    }

    /// Commit a change; `None` if the task was cancelled in the meantime.
    async fn commit<F, R>(&self, change: F) -> Result<Option<R>, DevflowError>
    where
        F: FnOnce(&mut Task) -> Result<R, DevflowError> + Send,
        R: Send,
    {
        match self.handle.commit(self.inner.store.as_ref(), change).await {
            Ok(value) => Ok(Some(value)),
            Err(DevflowError::InvalidTransition { .. })
                if self.handle.snapshot().status == TaskStatus::Cancelled =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Cancellation already released the slot and tore the task down.
    fn cancelled(&self) -> Arc<Task> {
        let task = self.handle.snapshot();
        info!(task_id = %task.id, "Worker stopped after cancellation");
        task
    }

    async fn complete(&self, ctx: &PhaseContext, score: f64) -> Result<Arc<Task>, DevflowError> {
        let deliverables = deliverables(ctx);
        if self
            .commit(move |t| t.complete(score, deliverables))
            .await?
            .is_none()
        {
            return Ok(self.cancelled());
        }
        let task = self.handle.snapshot();
        self.inner.tracker.complete(&task.id);
        self.finish(&task).await;
        Ok(task)
    }

    async fn fail(&self, reason: FailureReason, score: Option<f64>) -> Result<Arc<Task>, DevflowError> {
        let message = reason.to_string();
        if self
            .commit(move |t| t.fail(reason, score))
            .await?
            .is_none()
        {
            return Ok(self.cancelled());
        }
        let task = self.handle.snapshot();
        warn!(task_id = %task.id, reason = %message, "Task failed");
        self.inner
            .tracker
            .fail(&task.id, TaskStatus::Failed, &message);
        self.finish(&task).await;
        Ok(task)
    }

    async fn finish(&self, task: &Task) {
        self.handle.slot().release().await;
        if let Some(event) = TaskEvent::for_task(task) {
            for notifier in &self.inner.notifiers {
                if let Err(err) = notifier.notify(&event).await {
                    warn!(
                        task_id = %task.id,
                        event = event.event.as_str(),
                        error = %format!("{err:#}"),
                        "Notification delivery failed"
                    );
                }
            }
        }
        self.inner.teardown(&task.id);
    }
}

#[async_trait]
impl PassRunner for Worker {
    async fn run_pass(
        &mut self,
        phases: &[PhaseId],
        ctx: &mut PhaseContext,
    ) -> Result<PassOutcome, DevflowError> {
        for &phase in phases {
            if self.cancel_requested() {
                return Ok(PassOutcome::Cancelled);
            }

            let PhaseRun { record, result } = self
                .inner
                .executor
                .execute(phase_impl(phase), ctx, self.handle.cancel_token())
                .await;

            if self.cancel_requested() {
                info!(task_id = %ctx.task_id, phase = %phase, "Discarding result of in-flight phase");
                return Ok(PassOutcome::Cancelled);
            }

            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    if self.commit(move |t| t.append_record(record)).await?.is_none() {
                        return Ok(PassOutcome::Cancelled);
                    }
                    return Ok(PassOutcome::Failed(err));
                }
            };

            let checkpoint = phase.checkpoint(ctx.pass);
            let step = format!("{} complete", phase.label());
            let advanced = self
                .commit(move |t| {
                    t.append_record(record)?;
                    t.advance(checkpoint, step)
                })
                .await?;
            if advanced.is_none() {
                return Ok(PassOutcome::Cancelled);
            }
            self.inner.tracker.phase_complete(&ctx.task_id, phase, ctx.pass);
            ctx.record_output(output);
        }
        Ok(PassOutcome::Finished)
    }
}

fn deliverables(ctx: &PhaseContext) -> Deliverables {
    let reference = |phase: PhaseId| {
        ctx.output(phase)
            .map(|o| DeliverableRef::new(phase, &o.content, o.summary.clone()))
    };
    Deliverables {
        code: reference(PhaseId::Implementation),
        tests: reference(PhaseId::TestGeneration),
        docs: reference(PhaseId::Documentation),
    }
}
