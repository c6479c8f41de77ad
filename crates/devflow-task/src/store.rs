use async_trait::async_trait;
use thiserror::Error;

use devflow_utils::error::DevflowError;
use devflow_utils::types::{TaskId, TenantId};

use crate::model::Task;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Task {task_id} already exists")]
    AlreadyExists { task_id: String },

    #[error("Task {task_id} not found in store")]
    NotFound { task_id: String },

    #[error("Task {task_id} was modified concurrently (expected revision {expected}, found {found})")]
    Conflict {
        task_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Task id '{task_id}' cannot be stored")]
    InvalidId { task_id: String },

    #[error("Task store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl From<StoreError> for DevflowError {
    fn from(err: StoreError) -> Self {
        DevflowError::system(format!("task store: {err}"))
    }
}

/// Durable storage for tasks and their execution logs.
///
/// `save` is an atomic read-modify-write: it succeeds only if the stored
/// revision equals `task.revision`, and returns the new revision.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// # Errors
    ///
    /// `AlreadyExists` if the id is taken.
    async fn insert(&self, task: &Task) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// `Unavailable` if the store cannot be read.
    async fn load(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// # Errors
    ///
    /// `NotFound` for unknown tasks, `Conflict` on a stale revision.
    async fn save(&self, task: &Task) -> Result<u64, StoreError>;

    /// Tasks of one tenant, or all tasks, ordered by creation time.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the store cannot be read.
    async fn list(&self, tenant: Option<&TenantId>) -> Result<Vec<Task>, StoreError>;
}

pub(crate) fn check_revision(stored: &Task, incoming: &Task) -> Result<u64, StoreError> {
    if stored.revision != incoming.revision {
        return Err(StoreError::Conflict {
            task_id: incoming.id.to_string(),
            expected: incoming.revision,
            found: stored.revision,
        });
    }
    Ok(incoming.revision + 1)
}

pub(crate) fn sort_and_filter(mut tasks: Vec<Task>, tenant: Option<&TenantId>) -> Vec<Task> {
    if let Some(tenant) = tenant {
        tasks.retain(|t| &t.tenant_id == tenant);
    }
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    tasks
}
