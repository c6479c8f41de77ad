//! Orchestrator for autonomous development tasks
//!
//! This crate wires the phase implementations, the completion backend, the
//! quality gate, the task store, and the progress tracker into one task
//! lifecycle:
//!
//! ```text
//! submit ──► Queued ──► run ──► Running ──► [6 phases] ──► gate ──► Completed
//!               │                  │                         │
//!               │                  │                         └─► SelfCorrecting ──► gate ──► Completed | Failed
//!               └──── cancel ──────┴──► Cancelled
//! ```
//!
//! # Module Organization
//!
//! - `orchestrator.rs`: [`Orchestrator`] facade and its builder
//! - `worker.rs`: per-task pipeline driver
//! - `executor.rs`: single-phase execution with timeout and retry handling
//! - `self_correction.rs`: the one corrective pass after a failed gate
//! - `handle.rs`: task table entries (snapshot reads, serialized writes)
//! - `slots.rs`: quota slot leases
//! - `quota.rs` / `notify.rs`: collaborator seams
//!
//! # Concurrency
//!
//! Each task runs on one logical worker and its phases run strictly in
//! order; many tasks run at once. The completion call is the only long
//! suspension point. Cancellation is cooperative: it is checked between
//! phases, and a phase already in flight finishes before its result is
//! thrown away.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use devflow_config::Config;
//! use devflow_llm::ScriptedBackend;
//! use devflow_orchestrator::Orchestrator;
//! use devflow_utils::types::TaskSpec;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::builder(Config::default())
//!         .backend(Arc::new(ScriptedBackend::dry_run()))
//!         .build()?;
//!
//!     let spec = TaskSpec::new("acme", "web", "Add plan helper").with_no_requirements();
//!     let task_id = orchestrator.submit(spec).await?;
//!     let task = orchestrator.run(&task_id).await?;
//!     println!("{} at {}%", task.status, task.progress_percentage);
//!     Ok(())
//! }
//! ```

mod executor;
mod handle;
mod notify;
mod orchestrator;
mod quota;
mod self_correction;
mod slots;
mod worker;

pub use executor::{PhaseExecutor, PhaseRun, RetryPolicy};
pub use notify::{Notifier, TaskEvent, TaskEventKind};
pub use orchestrator::{DEFAULT_TENANT_CAP, Orchestrator, OrchestratorBuilder};
pub use quota::{InMemoryQuota, QuotaGate};
pub use self_correction::{
    CorrectionOutcome, PassOutcome, PassRunner, SelfCorrectionController, evaluate_context,
};
pub use slots::AgentSlot;
