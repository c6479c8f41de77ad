//! Execution log: the append-only audit trail of every phase a task ran.
//!
//! A [`PhaseRecord`] is opened when a phase starts, collects one
//! [`AttemptRecord`] per collaborator call, and is closed exactly once. Only
//! closed records can be appended to an [`ExecutionLog`], so a record in the
//! log is never mutated afterward.

mod log;
mod record;

pub use log::{ExecutionLog, JournalError};
pub use record::{AttemptOutcome, AttemptRecord, OpenPhaseRecord, PhaseRecord, RecordStatus, Snapshot};
