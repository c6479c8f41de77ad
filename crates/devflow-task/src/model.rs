use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devflow_journal::{ExecutionLog, JournalError, PhaseRecord};
use devflow_utils::canonicalization::content_hash;
use devflow_utils::error::DevflowError;
use devflow_utils::types::{
    COMPLETE_PERCENT, PhaseId, Priority, ProjectId, Requirements, TaskId, TaskSpec, TaskStatus,
    TenantId,
};

use crate::failure::FailureReason;

/// Reference to one deliverable produced by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverableRef {
    pub phase: PhaseId,
    pub content_hash: String,
    pub bytes: usize,
    pub summary: Option<String>,
}

impl DeliverableRef {
    pub fn new(phase: PhaseId, content: &str, summary: Option<String>) -> Self {
        Self {
            phase,
            content_hash: content_hash(content),
            bytes: content.len(),
            summary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverables {
    pub code: Option<DeliverableRef>,
    pub tests: Option<DeliverableRef>,
    pub docs: Option<DeliverableRef>,
}

impl Deliverables {
    /// One-line description used in terminal notifications.
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [("code", &self.code), ("tests", &self.tests), ("docs", &self.docs)]
            .into_iter()
            .filter_map(|(name, item)| item.as_ref().map(|d| format!("{name} ({} bytes)", d.bytes)))
            .collect();
        if parts.is_empty() {
            "no deliverables".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// A development task and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub requirements: Requirements,

    pub status: TaskStatus,
    pub progress_percentage: u8,
    pub current_step: String,
    pub assigned_agent_id: Option<String>,
    /// Number of self-correction passes entered (0 or 1).
    pub self_correction_count: u8,

    pub deliverables: Deliverables,
    pub quality_score: Option<f64>,
    pub failure_reason: Option<FailureReason>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub execution_log: ExecutionLog,
    /// Store revision this value was read at or written as.
    pub revision: u64,
}

impl Task {
    /// Create a queued task from an admitted submission.
    #[must_use]
    pub fn admitted(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            execution_log: ExecutionLog::new(id.clone()),
            id,
            tenant_id: spec.tenant_id,
            project_id: spec.project_id,
            title: spec.title.trim().to_string(),
            description: spec.description,
            priority: spec.priority,
            requirements: spec.requirements,
            status: TaskStatus::Queued,
            progress_percentage: 0,
            current_step: "Queued".to_string(),
            assigned_agent_id: None,
            self_correction_count: 0,
            deliverables: Deliverables::default(),
            quality_score: None,
            failure_reason: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            revision: 0,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: TaskStatus, action: &str) -> Result<TaskStatus, DevflowError> {
        if !self.status.can_transition_to(next) {
            return Err(DevflowError::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status,
                action: action.to_string(),
            });
        }
        let from = self.status;
        self.status = next;
        Ok(from)
    }

    fn ensure_mutable(&self, action: &str) -> Result<(), DevflowError> {
        if self.is_terminal() {
            return Err(DevflowError::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// `Queued -> Running`, binding the task to an agent slot.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the task is queued.
    pub fn start(&mut self, agent_id: impl Into<String>) -> Result<(), DevflowError> {
        self.transition(TaskStatus::Running, "start")?;
        self.assigned_agent_id = Some(agent_id.into());
        self.started_at = Some(Utc::now());
        self.current_step = "Starting".to_string();
        Ok(())
    }

    /// Move progress forward. Returns `false` (and changes nothing) when the
    /// update does not increase the percentage; 100 is reserved for
    /// [`Task::complete`].
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the task is terminal.
    pub fn advance(&mut self, percentage: u8, step: impl Into<String>) -> Result<bool, DevflowError> {
        self.ensure_mutable("advance")?;
        if percentage <= self.progress_percentage || percentage >= COMPLETE_PERCENT {
            return Ok(false);
        }
        self.progress_percentage = percentage;
        self.current_step = step.into();
        Ok(true)
    }

    /// Append a closed phase record to the execution log.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the task is terminal; `System` if the record
    /// breaks the log's ordering rules.
    pub fn append_record(&mut self, record: PhaseRecord) -> Result<(), DevflowError> {
        self.ensure_mutable("record a phase")?;
        self.execution_log
            .append(record)
            .map(|_| ())
            .map_err(|e: JournalError| DevflowError::system(format!("execution log: {e}")))
    }

    /// `Running -> SelfCorrecting`; allowed once per task lifetime.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if not running or a correction was already entered.
    pub fn begin_self_correction(&mut self) -> Result<(), DevflowError> {
        if self.self_correction_count > 0 {
            return Err(DevflowError::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status,
                action: "self-correct again".to_string(),
            });
        }
        self.transition(TaskStatus::SelfCorrecting, "self-correct")?;
        self.self_correction_count += 1;
        self.current_step = "Self-correction".to_string();
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless running or self-correcting.
    pub fn complete(&mut self, quality_score: f64, deliverables: Deliverables) -> Result<(), DevflowError> {
        self.transition(TaskStatus::Completed, "complete")?;
        self.progress_percentage = COMPLETE_PERCENT;
        self.current_step = "Completed".to_string();
        self.quality_score = Some(quality_score.clamp(0.0, 1.0));
        self.deliverables = deliverables;
        self.finish();
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidTransition` unless running or self-correcting.
    pub fn fail(&mut self, reason: FailureReason, quality_score: Option<f64>) -> Result<(), DevflowError> {
        self.transition(TaskStatus::Failed, "fail")?;
        self.current_step = format!("Failed in {}", reason.phase.label());
        self.failure_reason = Some(reason);
        self.quality_score = quality_score.map(|s| s.clamp(0.0, 1.0));
        self.finish();
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidTransition` if the task is already terminal.
    pub fn cancel(&mut self) -> Result<(), DevflowError> {
        self.transition(TaskStatus::Cancelled, "cancel")?;
        self.current_step = "Cancelled".to_string();
        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
        self.assigned_agent_id = None;
    }
}
