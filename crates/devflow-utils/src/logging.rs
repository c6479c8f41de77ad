//! Structured logging for the orchestration engine.
//!
//! Spans carry `task_id`, `tenant_id`, `phase`, and `pass` so that log lines from
//! concurrently running tasks can be told apart.

use tracing::{Level, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::types::{PhaseId, PhasePass, TaskStatus};

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("devflow=debug,info")
            } else {
                EnvFilter::try_new("devflow=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize a human-readable tracing subscriber.
///
/// `RUST_LOG` takes precedence over the built-in filter. Verbose mode adds
/// targets and span close events (which carry span durations).
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = env_filter(verbose);

    if verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Initialize a JSON tracing subscriber for log shipping.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_json_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(env_filter(false))
        .with(fmt::layer().json().with_current_span(true))
        .try_init()?;
    Ok(())
}

pub fn task_span(task_id: &str, tenant_id: &str) -> tracing::Span {
    span!(Level::INFO, "task", task_id = %task_id, tenant_id = %tenant_id)
}

pub fn phase_span(task_id: &str, phase: PhaseId, pass: PhasePass) -> tracing::Span {
    span!(
        Level::INFO,
        "phase_execution",
        task_id = %task_id,
        phase = %phase,
        pass = %pass,
    )
}

pub fn log_phase_start(task_id: &str, phase: PhaseId, pass: PhasePass) {
    info!(task_id = %task_id, phase = %phase, pass = %pass, "Starting phase execution");
}

pub fn log_phase_complete(task_id: &str, phase: PhaseId, attempts: u32, duration_ms: u128) {
    info!(
        task_id = %task_id,
        phase = %phase,
        attempts,
        duration_ms = %duration_ms,
        "Phase execution completed"
    );
}

pub fn log_phase_error(task_id: &str, phase: PhaseId, error: &str, duration_ms: u128) {
    warn!(
        task_id = %task_id,
        phase = %phase,
        error = %error,
        duration_ms = %duration_ms,
        "Phase execution failed"
    );
}

pub fn log_transition(task_id: &str, from: TaskStatus, to: TaskStatus) {
    info!(task_id = %task_id, from = %from, to = %to, "Task status transition");
}
