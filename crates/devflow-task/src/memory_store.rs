use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use devflow_utils::types::{TaskId, TenantId};

use crate::model::Task;
use crate::store::{StoreError, TaskStore, check_revision, sort_and_filter};

/// Process-local task store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists {
                task_id: task.id.to_string(),
            });
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<u64, StoreError> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks.get_mut(&task.id).ok_or_else(|| StoreError::NotFound {
            task_id: task.id.to_string(),
        })?;
        let revision = check_revision(stored, task)?;
        let mut next = task.clone();
        next.revision = revision;
        *stored = next;
        Ok(revision)
    }

    async fn list(&self, tenant: Option<&TenantId>) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await.values().cloned().collect();
        Ok(sort_and_filter(tasks, tenant))
    }
}
