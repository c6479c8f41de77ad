//! Task model and persistence.
//!
//! [`Task`] carries the lifecycle state machine; every mutator checks the
//! transition and refuses to touch a terminal task. [`TaskStore`] is the
//! durable-storage seam with revision-checked writes.

mod failure;
mod file_store;
mod memory_store;
mod model;
mod store;

pub use failure::{FailureKind, FailureReason};
pub use file_store::FileTaskStore;
pub use memory_store::InMemoryTaskStore;
pub use model::{DeliverableRef, Deliverables, Task};
pub use store::{StoreError, TaskStore};
