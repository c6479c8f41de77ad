//! Terminal-event notification seam (webhooks and the like).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devflow_task::Task;
use devflow_utils::types::{TaskId, TaskStatus};

/// Name of a terminal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEventKind {
    #[serde(rename = "task.completed")]
    Completed,
    #[serde(rename = "task.failed")]
    Failed,
}

impl TaskEventKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "task.completed",
            Self::Failed => "task.failed",
        }
    }
}

/// Payload sent when a task completes or fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event: TaskEventKind,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub quality_score: Option<f64>,
    pub deliverables: String,
    /// Failure reason, for `task.failed`.
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    /// Build the event for a terminal task. Cancelled and non-terminal tasks
    /// produce no event.
    #[must_use]
    pub fn for_task(task: &Task) -> Option<Self> {
        let event = match task.status {
            TaskStatus::Completed => TaskEventKind::Completed,
            TaskStatus::Failed => TaskEventKind::Failed,
            _ => return None,
        };
        Some(Self {
            event,
            task_id: task.id.clone(),
            status: task.status,
            quality_score: task.quality_score,
            deliverables: task.deliverables.summary(),
            reason: task.failure_reason.as_ref().map(ToString::to_string),
            timestamp: task.completed_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Receiver of terminal task events.
///
/// Delivery failures are logged by the orchestrator and never change the
/// task's outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// # Errors
    ///
    /// The event could not be delivered.
    async fn notify(&self, event: &TaskEvent) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_task::Deliverables;
    use devflow_utils::test_support::sample_spec;

    #[test]
    fn completed_task_produces_completed_event() {
        let mut task = Task::admitted(TaskId::new("t-1"), sample_spec("acme"));
        task.start("agent-1").unwrap();
        task.complete(0.95, Deliverables::default()).unwrap();

        let event = TaskEvent::for_task(&task).unwrap();
        assert_eq!(event.event, TaskEventKind::Completed);
        assert_eq!(event.quality_score, Some(0.95));
        assert_eq!(event.deliverables, "no deliverables");
        assert!(event.reason.is_none());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task.completed");
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn cancelled_and_running_tasks_produce_no_event() {
        let mut task = Task::admitted(TaskId::new("t-1"), sample_spec("acme"));
        assert!(TaskEvent::for_task(&task).is_none());
        task.cancel().unwrap();
        assert!(TaskEvent::for_task(&task).is_none());
    }
}
