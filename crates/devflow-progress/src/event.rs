use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devflow_utils::types::{TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    Progress,
    PhaseComplete,
    Completion,
    Error,
}

/// Latest known progress of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub percentage: u8,
    pub current_step: String,
    /// Sequence number of the last event folded into this snapshot.
    pub seq: u64,
    pub updated_at: DateTime<Utc>,
}

/// One progress notification. Ephemeral; the execution log is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub kind: ProgressEventKind,
    pub seq: u64,
    pub status: TaskStatus,
    pub percentage: u8,
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// The event a new (or lagging) subscriber receives in place of history.
    #[must_use]
    pub fn from_snapshot(snapshot: &ProgressSnapshot) -> Self {
        let kind = match snapshot.status {
            TaskStatus::Completed => ProgressEventKind::Completion,
            TaskStatus::Failed | TaskStatus::Cancelled => ProgressEventKind::Error,
            _ => ProgressEventKind::Progress,
        };
        Self {
            task_id: snapshot.task_id.clone(),
            kind,
            seq: snapshot.seq,
            status: snapshot.status,
            percentage: snapshot.percentage,
            step: snapshot.current_step.clone(),
            message: None,
            timestamp: snapshot.updated_at,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: TaskStatus, percentage: u8) -> ProgressSnapshot {
        ProgressSnapshot {
            task_id: TaskId::new("t-1"),
            status,
            percentage,
            current_step: "Validation complete".into(),
            seq: 7,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_event_kind_follows_status() {
        let running = ProgressEvent::from_snapshot(&snapshot(TaskStatus::Running, 80));
        assert_eq!(running.kind, ProgressEventKind::Progress);
        assert_eq!(running.seq, 7);
        assert!(!running.is_terminal());

        let cancelled = ProgressEvent::from_snapshot(&snapshot(TaskStatus::Cancelled, 80));
        assert_eq!(cancelled.kind, ProgressEventKind::Error);
        assert!(cancelled.is_terminal());
    }

    #[test]
    fn wire_format_uses_snake_case_kinds() {
        let mut event = ProgressEvent::from_snapshot(&snapshot(TaskStatus::Running, 80));
        event.kind = ProgressEventKind::PhaseComplete;

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "phase_complete");
        assert_eq!(json["status"], "running");
        assert_eq!(json["percentage"], 80);
        assert!(json.get("message").is_none());
    }
}
