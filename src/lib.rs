//! devflow - autonomous development task orchestration
//!
//! devflow takes a task description and drives it through six AI-assisted
//! phases (Analysis, Architecture, Implementation, TestGeneration, Validation,
//! Documentation), scores the result with a deterministic quality gate, and
//! runs at most one self-correction pass when the gate fails. Tenants are
//! admitted through a quota collaborator; progress streams to any number of
//! subscribers.
//!
//! # Quick Start (Library)
//!
//! ```toml
//! [dependencies]
//! devflow = "0.3"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use devflow::{Config, Orchestrator, TaskSpec};
//! use devflow::llm::ScriptedBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), devflow::DevflowError> {
//!     let orchestrator = Orchestrator::builder(Config::default())
//!         .backend(Arc::new(ScriptedBackend::dry_run()))
//!         .build()?;
//!
//!     let spec = TaskSpec::new("acme", "web", "Add a plan helper")
//!         .with_requirement("functional", ["enumerate plan steps"]);
//!     let id = orchestrator.submit(spec).await?;
//!
//!     let mut progress = orchestrator.subscribe(&id).expect("task is live");
//!     let worker = orchestrator.spawn(id.clone());
//!     while let Some(event) = progress.recv().await {
//!         println!("{:>3}% {}", event.percentage, event.step);
//!     }
//!
//!     let task = worker.await.expect("worker panicked")?;
//!     println!("{} (score {:?})", task.status, task.quality_score);
//!     Ok(())
//! }
//! ```
//!
//! # Canonical JSON
//!
//! Execution logs export as JCS (RFC 8785) canonical JSON; use [`emit_jcs`]
//! for your own integrations.
//!
//! # Stable Public API
//!
//! - [`Orchestrator`] and [`OrchestratorBuilder`] - task lifecycle
//! - [`TaskSpec`], [`Task`], [`TaskStatus`], [`PhaseId`] - task model
//! - [`Config`] and [`ConfigBuilder`] - configuration management
//! - [`DevflowError`] - library error type
//! - [`QualityGate`] / [`QualityResult`] - deterministic scoring
//! - [`emit_jcs`] - JCS canonical JSON emission
//!
//! Member crates are re-exported as modules and are not covered by semver
//! stability guarantees.

// ============================================================================
// Stable Public API
// ============================================================================

pub use devflow_orchestrator::{Orchestrator, OrchestratorBuilder};

pub use devflow_utils::types::{PhaseId, Priority, Requirements, TaskId, TaskSpec, TaskStatus, TenantId};

pub use devflow_task::Task;

pub use devflow_config::{Config, ConfigBuilder};

pub use devflow_utils::error::{DevflowError, ErrorCategory, UserFriendlyError};

pub use devflow_gate::{QualityGate, QualityResult};

pub use devflow_utils::canonicalization::emit_jcs;

#[must_use]
pub fn devflow_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// ============================================================================
// Member crates - accessible but not stable
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub use devflow_utils::test_support;

#[doc(hidden)]
pub use devflow_utils::{atomic_write, canonicalization, error, logging, types};

pub use devflow_config as config;
pub use devflow_gate as gate;
pub use devflow_journal as journal;
pub use devflow_llm as llm;
pub use devflow_orchestrator as orchestrator;
pub use devflow_phase_api as phase_api;
pub use devflow_phases as phases;
pub use devflow_progress as progress;
pub use devflow_task as task;
