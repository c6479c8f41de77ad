//! Single-phase execution: timeout, retry with backoff, attempt recording.
//!
//! A phase call goes through these steps:
//!
//! 1. Build the context from dependency outputs (missing dependency fails
//!    the phase without calling the backend)
//! 2. Build the prompt and open a [`OpenPhaseRecord`]
//! 3. Call the completion backend under the phase timeout
//! 4. Postprocess the response into a [`PhaseOutput`]
//! 5. On a transient failure (backend error, timeout, malformed output)
//!    back off and retry, up to `max_retries` additional attempts; a
//!    cancelled task is not retried
//! 6. Close the record with the final outcome
//!
//! Every attempt lands in the record with its wall-clock duration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, warn};

use devflow_config::Config;
use devflow_journal::{AttemptOutcome, OpenPhaseRecord, PhaseRecord};
use devflow_llm::{Completion, CompletionBackend, CompletionRequest, LlmError};
use devflow_phase_api::{Phase, PhaseContext, PhaseOutput};
use devflow_utils::error::PhaseError;
use devflow_utils::logging::{log_phase_complete, log_phase_error, log_phase_start, phase_span};

/// Closed record of one phase execution and its result.
#[derive(Debug)]
pub struct PhaseRun {
    pub record: PhaseRecord,
    pub result: Result<PhaseOutput, PhaseError>,
}

/// Retry budget and backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries(),
            initial_backoff: config.initial_backoff(),
            multiplier: config.backoff_multiplier(),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the `failed`-th failed attempt (1-based).
    #[must_use]
    pub fn backoff(&self, failed: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(failed.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug)]
struct AttemptFailure {
    message: String,
    retryable: bool,
    timed_out: bool,
}

impl AttemptFailure {
    fn from_llm(err: &LlmError) -> Self {
        Self {
            message: err.to_string(),
            retryable: err.is_transient(),
            timed_out: matches!(err, LlmError::Timeout { .. }),
        }
    }

    fn from_phase(err: &PhaseError) -> Self {
        Self {
            message: err.to_string(),
            retryable: matches!(err, PhaseError::MalformedOutput { .. }),
            timed_out: false,
        }
    }
}

/// Bound a completion call by the request's timeout.
pub(crate) async fn complete_with_timeout(
    backend: &dyn CompletionBackend,
    request: CompletionRequest,
) -> Result<Completion, LlmError> {
    let duration = request.timeout;
    match tokio::time::timeout(duration, backend.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout { duration }),
    }
}

/// Runs one phase against the completion backend.
pub struct PhaseExecutor {
    backend: Arc<dyn CompletionBackend>,
    config: Arc<Config>,
    retry: RetryPolicy,
}

impl PhaseExecutor {
    #[must_use]
    pub fn new(backend: Arc<dyn CompletionBackend>, config: Arc<Config>) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            backend,
            config,
            retry,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Execute `phase` for the task described by `ctx`.
    ///
    /// Never returns early without a record: the returned [`PhaseRun`]
    /// always carries a closed [`PhaseRecord`], even when the phase failed.
    /// Once `cancel` fires no further attempt starts; an attempt already in
    /// flight runs to completion.
    pub async fn execute(
        &self,
        phase: &dyn Phase,
        ctx: &PhaseContext,
        cancel: &CancellationToken,
    ) -> PhaseRun {
        let span = phase_span(ctx.task_id.as_str(), phase.id(), ctx.pass);
        self.execute_inner(phase, ctx, cancel).instrument(span).await
    }

    async fn execute_inner(
        &self,
        phase: &dyn Phase,
        ctx: &PhaseContext,
        cancel: &CancellationToken,
    ) -> PhaseRun {
        let id = phase.id();
        let task_id = ctx.task_id.as_str();
        let clock = Instant::now();
        log_phase_start(task_id, id, ctx.pass);

        let prompt = phase.prompt(ctx);
        let context = match phase.context(ctx) {
            Ok(context) => context,
            Err(err) => {
                log_phase_error(task_id, id, &err.to_string(), clock.elapsed().as_millis());
                let record = OpenPhaseRecord::open(id, ctx.pass, &prompt, "").fail(err.to_string());
                return PhaseRun {
                    record,
                    result: Err(err),
                };
            }
        };

        let mut record = OpenPhaseRecord::open(id, ctx.pass, &prompt, &context);
        let timeout = self.config.phase_timeout(id);
        let request = CompletionRequest::from_prompt(
            task_id,
            id,
            self.config.model_for_phase(id),
            timeout,
            &context,
            &prompt,
        );

        loop {
            let attempt = record.next_attempt();
            let started_at = Utc::now();
            let attempt_clock = Instant::now();
            let outcome = self.attempt(phase, ctx, request.clone()).await;
            let duration_ms = u64::try_from(attempt_clock.elapsed().as_millis()).unwrap_or(u64::MAX);

            let failure = match outcome {
                Ok(output) => {
                    record.record_attempt(started_at, duration_ms, AttemptOutcome::Succeeded);
                    log_phase_complete(task_id, id, attempt, clock.elapsed().as_millis());
                    return PhaseRun {
                        record: record.succeed(&output.content),
                        result: Ok(output),
                    };
                }
                Err(failure) => failure,
            };

            record.record_attempt(
                started_at,
                duration_ms,
                AttemptOutcome::Failed {
                    error: failure.message.clone(),
                    retryable: failure.retryable,
                },
            );

            let final_error = if !failure.retryable {
                Some(PhaseError::NonRetryable {
                    phase: id,
                    reason: failure.message.clone(),
                })
            } else if attempt >= self.retry.max_attempts() {
                Some(if failure.timed_out {
                    PhaseError::Timeout {
                        phase: id,
                        timeout_seconds: timeout.as_secs(),
                    }
                } else {
                    PhaseError::RetriesExhausted {
                        phase: id,
                        attempts: attempt,
                        last_error: failure.message.clone(),
                    }
                })
            } else if cancel.is_cancelled() {
                Some(PhaseError::Cancelled {
                    phase: id,
                    attempts: attempt,
                })
            } else {
                None
            };

            if let Some(err) = final_error {
                log_phase_error(task_id, id, &err.to_string(), clock.elapsed().as_millis());
                return PhaseRun {
                    record: record.fail(err.to_string()),
                    result: Err(err),
                };
            }

            let backoff = self.retry.backoff(attempt);
            warn!(
                task_id = %task_id,
                phase = %id,
                attempt,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                error = %failure.message,
                "Phase attempt failed; retrying"
            );
            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                () = cancel.cancelled() => {
                    let err = PhaseError::Cancelled {
                        phase: id,
                        attempts: attempt,
                    };
                    log_phase_error(task_id, id, &err.to_string(), clock.elapsed().as_millis());
                    return PhaseRun {
                        record: record.fail(err.to_string()),
                        result: Err(err),
                    };
                }
            }
        }
    }

    async fn attempt(
        &self,
        phase: &dyn Phase,
        ctx: &PhaseContext,
        request: CompletionRequest,
    ) -> Result<PhaseOutput, AttemptFailure> {
        let completion = complete_with_timeout(self.backend.as_ref(), request)
            .await
            .map_err(|e| AttemptFailure::from_llm(&e))?;

        let mut output = phase
            .postprocess(&completion.text, ctx)
            .map_err(|e| AttemptFailure::from_phase(&e))?;
        if output.confidence.is_none() {
            output.confidence = completion.confidence;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_journal::RecordStatus;
    use devflow_llm::{ScriptStep, ScriptedBackend};
    use devflow_phases::phase_impl;
    use devflow_utils::test_support::{CLEAN_IMPLEMENTATION, envelope};
    use devflow_utils::types::{PhaseId, Priority, Requirements, TaskId};

    fn ctx() -> PhaseContext {
        PhaseContext::new(
            TaskId::new("t-1"),
            "Add helpers",
            "add and is_even",
            Priority::Medium,
            Requirements::None,
        )
    }

    fn executor(backend: ScriptedBackend) -> PhaseExecutor {
        PhaseExecutor::new(
            Arc::new(backend),
            Arc::new(Config::minimal_for_testing()),
        )
    }

    #[test]
    fn default_backoff_schedule_is_one_then_four_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    proptest::proptest! {
        #[test]
        fn backoff_never_shrinks(initial_ms in 0u64..10_000, multiplier in 1u32..8, failed in 1u32..12) {
            let policy = RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(initial_ms),
                multiplier,
            };
            proptest::prop_assert!(policy.backoff(failed + 1) >= policy.backoff(failed));
            proptest::prop_assert_eq!(policy.backoff(1), policy.initial_backoff);
        }
    }

    #[tokio::test]
    async fn first_attempt_success_closes_record() {
        let backend = ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            [ScriptStep::respond(envelope("scope: two helpers", 0.8))],
        );
        let run = executor(backend)
            .execute(phase_impl(PhaseId::Analysis), &ctx(), &CancellationToken::new())
            .await;

        let output = run.result.unwrap();
        assert_eq!(output.content, "scope: two helpers");
        assert_eq!(output.confidence, Some(0.8));
        assert_eq!(run.record.status, RecordStatus::Succeeded);
        assert_eq!(run.record.attempts.len(), 1);
        assert!(run.record.output.as_ref().unwrap().is_intact());
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let backend = ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            [
                ScriptStep::Fail(LlmError::ProviderOutage("503".into())),
                ScriptStep::respond("plain analysis text"),
            ],
        );
        let run = executor(backend)
            .execute(phase_impl(PhaseId::Analysis), &ctx(), &CancellationToken::new())
            .await;

        assert!(run.result.is_ok());
        assert_eq!(run.record.attempts.len(), 2);
        assert!(matches!(
            run.record.attempts[0].outcome,
            AttemptOutcome::Failed { retryable: true, .. }
        ));
        assert_eq!(run.record.attempts[1].attempt, 2);
    }

    #[tokio::test]
    async fn malformed_output_counts_as_transient() {
        let backend = ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            [ScriptStep::respond("   "), ScriptStep::respond("analysis")],
        );
        let run = executor(backend)
            .execute(phase_impl(PhaseId::Analysis), &ctx(), &CancellationToken::new())
            .await;
        assert_eq!(run.result.unwrap().content, "analysis");
        assert_eq!(run.record.attempts.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_after_three_attempts() {
        let backend = ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            (0..3).map(|_| ScriptStep::Fail(LlmError::Transport("reset".into()))),
        );
        let run = executor(backend)
            .execute(phase_impl(PhaseId::Analysis), &ctx(), &CancellationToken::new())
            .await;

        match run.result {
            Err(PhaseError::RetriesExhausted {
                phase, attempts, ..
            }) => {
                assert_eq!(phase, PhaseId::Analysis);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(run.record.status, RecordStatus::Failed);
        assert_eq!(run.record.attempts.len(), 3);
        assert!(run.record.error.as_ref().unwrap().contains("reset"));
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let backend = ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            [ScriptStep::Fail(LlmError::ProviderAuth("401".into()))],
        );
        let run = executor(backend)
            .execute(phase_impl(PhaseId::Analysis), &ctx(), &CancellationToken::new())
            .await;

        assert!(matches!(run.result, Err(PhaseError::NonRetryable { .. })));
        assert_eq!(run.record.attempts.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_task_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            (0..3).map(|_| ScriptStep::Fail(LlmError::Transport("reset".into()))),
        ));
        let executor = PhaseExecutor::new(backend.clone(), Arc::new(Config::minimal_for_testing()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = executor
            .execute(phase_impl(PhaseId::Analysis), &ctx(), &cancel)
            .await;

        assert_eq!(
            run.result.unwrap_err(),
            PhaseError::Cancelled {
                phase: PhaseId::Analysis,
                attempts: 1
            }
        );
        assert_eq!(run.record.status, RecordStatus::Failed);
        assert_eq!(run.record.attempts.len(), 1);
        assert_eq!(backend.calls_for(PhaseId::Analysis), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let backend = Arc::new(ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            (0..3).map(|_| ScriptStep::Fail(LlmError::Transport("reset".into()))),
        ));
        let mut config = Config::minimal_for_testing();
        config.retry.initial_backoff_ms = Some(60_000);
        let executor = PhaseExecutor::new(backend.clone(), Arc::new(config));
        let cancel = CancellationToken::new();
        let ctx = ctx();

        let (run, ()) = tokio::join!(
            executor.execute(phase_impl(PhaseId::Analysis), &ctx, &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            }
        );

        assert!(matches!(run.result, Err(PhaseError::Cancelled { attempts: 1, .. })));
        assert_eq!(backend.calls_for(PhaseId::Analysis), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out_each_attempt() {
        let backend = ScriptedBackend::new().with_script(
            PhaseId::Analysis,
            (0..3).map(|_| ScriptStep::Delay(Duration::from_secs(600), "late".into())),
        );
        let run = executor(backend)
            .execute(phase_impl(PhaseId::Analysis), &ctx(), &CancellationToken::new())
            .await;

        assert!(matches!(
            run.result,
            Err(PhaseError::Timeout {
                phase: PhaseId::Analysis,
                timeout_seconds: 5
            })
        ));
        assert_eq!(run.record.attempts.len(), 3);
    }

    #[tokio::test]
    async fn missing_dependency_fails_without_calling_backend() {
        let backend = ScriptedBackend::new();
        let calls = Arc::new(backend);
        let executor = PhaseExecutor::new(calls.clone(), Arc::new(Config::minimal_for_testing()));
        let run = executor
            .execute(phase_impl(PhaseId::Implementation), &ctx(), &CancellationToken::new())
            .await;

        assert!(matches!(
            run.result,
            Err(PhaseError::DependencyNotSatisfied {
                dependency: PhaseId::Analysis,
                ..
            })
        ));
        assert!(run.record.attempts.is_empty());
        assert!(calls.calls().is_empty());
    }

    #[tokio::test]
    async fn completion_confidence_fills_in_when_response_has_none() {
        struct Confident;

        #[async_trait::async_trait]
        impl CompletionBackend for Confident {
            async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
                Ok(Completion::new(format!("```rust\n{CLEAN_IMPLEMENTATION}```"), "test", "m")
                    .with_confidence(0.6))
            }

            fn provider(&self) -> &str {
                "test"
            }
        }

        let mut ctx = ctx();
        ctx.record_output(PhaseOutput::new(PhaseId::Analysis, "analysis"));
        ctx.record_output(PhaseOutput::new(PhaseId::Architecture, "architecture"));
        let executor = PhaseExecutor::new(Arc::new(Confident), Arc::new(Config::minimal_for_testing()));
        let run = executor
            .execute(phase_impl(PhaseId::Implementation), &ctx, &CancellationToken::new())
            .await;

        let output = run.result.unwrap();
        assert_eq!(output.confidence, Some(0.6));
        assert!(output.content.contains("pub fn add"));
    }
}
