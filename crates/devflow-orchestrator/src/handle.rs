use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use devflow_task::{Task, TaskStore};
use devflow_utils::error::DevflowError;
use devflow_utils::logging::log_transition;

use crate::slots::AgentSlot;

/// Orchestrator-side entry of the task table.
///
/// Readers take an `Arc<Task>` snapshot from the watch channel and never
/// touch the writer lock. Writers are serialized by `writer`; a change is
/// persisted first and only then published, so the published state is
/// always the last durable one.
pub(crate) struct TaskHandle {
    state: watch::Sender<Arc<Task>>,
    writer: Mutex<()>,
    cancel: CancellationToken,
    slot: AgentSlot,
}

impl TaskHandle {
    pub(crate) fn new(task: Task, slot: AgentSlot) -> Self {
        let (state, _) = watch::channel(Arc::new(task));
        Self {
            state,
            writer: Mutex::new(()),
            cancel: CancellationToken::new(),
            slot,
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Task> {
        Arc::clone(&self.state.borrow())
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Arc<Task>> {
        self.state.subscribe()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn slot(&self) -> &AgentSlot {
        &self.slot
    }

    /// Apply `change` to a copy of the task, persist it, then publish it.
    ///
    /// Nothing is published if `change` or the store write fails.
    pub(crate) async fn commit<F, R>(&self, store: &dyn TaskStore, change: F) -> Result<R, DevflowError>
    where
        F: FnOnce(&mut Task) -> Result<R, DevflowError> + Send,
        R: Send,
    {
        let _writer = self.writer.lock().await;
        let mut next = Task::clone(&self.state.borrow());
        let from = next.status;
        let result = change(&mut next)?;

        next.revision = store.save(&next).await?;
        if next.status != from {
            log_transition(next.id.as_str(), from, next.status);
        }
        self.state.send_replace(Arc::new(next));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::InMemoryQuota;
    use devflow_task::InMemoryTaskStore;
    use devflow_utils::test_support::sample_spec;
    use devflow_utils::types::{TaskId, TaskStatus, TenantId};

    async fn handle(store: &InMemoryTaskStore) -> TaskHandle {
        let task = Task::admitted(TaskId::new("t-1"), sample_spec("acme"));
        store.insert(&task).await.unwrap();
        let slot = AgentSlot::reserved(TenantId::new("acme"), Arc::new(InMemoryQuota::new(1)));
        TaskHandle::new(task, slot)
    }

    #[tokio::test]
    async fn commit_persists_then_publishes() {
        let store = InMemoryTaskStore::new();
        let handle = handle(&store).await;
        let mut watcher = handle.watch();

        handle
            .commit(&store, |t| t.start("agent-1"))
            .await
            .unwrap();

        assert!(watcher.has_changed().unwrap());
        let published = watcher.borrow_and_update().clone();
        assert_eq!(published.status, TaskStatus::Running);
        assert_eq!(published.revision, 1);

        let stored = store.load(&TaskId::new("t-1")).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn rejected_change_publishes_nothing() {
        let store = InMemoryTaskStore::new();
        let handle = handle(&store).await;
        let before = handle.snapshot();

        let err = handle.commit(&store, |t| t.complete(1.0, Default::default())).await;
        assert!(matches!(err, Err(DevflowError::InvalidTransition { .. })));
        assert_eq!(handle.snapshot(), before);
    }

    #[tokio::test]
    async fn store_failure_leaves_last_durable_state() {
        let store = InMemoryTaskStore::new();
        let handle = handle(&store).await;
        let other = InMemoryTaskStore::new();

        let err = handle.commit(&other, |t| t.start("agent-1")).await;
        assert!(matches!(err, Err(DevflowError::System { .. })));
        assert_eq!(handle.snapshot().status, TaskStatus::Queued);
    }
}
