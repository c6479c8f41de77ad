use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devflow_utils::canonicalization::content_hash;
use devflow_utils::types::{PhaseId, PhasePass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RecordStatus {
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Captured text together with its blake3 hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub content: String,
    pub hash: String,
}

impl Snapshot {
    pub fn capture(content: impl Into<String>) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        Self { content, hash }
    }

    #[must_use]
    pub fn is_intact(&self) -> bool {
        content_hash(&self.content) == self.hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { error: String, retryable: bool },
}

/// One call to the completion collaborator within a phase execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number within the phase execution.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }
}

/// A phase execution that has started but not yet been closed.
///
/// Closing consumes the value and yields an immutable [`PhaseRecord`].
#[derive(Debug, Clone)]
pub struct OpenPhaseRecord {
    phase: PhaseId,
    pass: PhasePass,
    status: RecordStatus,
    input: Snapshot,
    context: Snapshot,
    started_at: DateTime<Utc>,
    attempts: Vec<AttemptRecord>,
}

impl OpenPhaseRecord {
    pub fn open(phase: PhaseId, pass: PhasePass, prompt: &str, context: &str) -> Self {
        Self {
            phase,
            pass,
            status: RecordStatus::Pending,
            input: Snapshot::capture(prompt),
            context: Snapshot::capture(context),
            started_at: Utc::now(),
            attempts: Vec::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    #[must_use]
    pub fn status(&self) -> RecordStatus {
        self.status
    }

    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Attempt number the next recorded attempt will carry.
    #[must_use]
    pub fn next_attempt(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    pub fn record_attempt(
        &mut self,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        outcome: AttemptOutcome,
    ) {
        self.status = RecordStatus::Running;
        let attempt = self.next_attempt();
        self.attempts.push(AttemptRecord {
            attempt,
            started_at,
            duration_ms,
            outcome,
        });
    }

    #[must_use]
    pub fn succeed(self, output: &str) -> PhaseRecord {
        self.close(RecordStatus::Succeeded, Some(Snapshot::capture(output)), None)
    }

    #[must_use]
    pub fn fail(self, error: impl Into<String>) -> PhaseRecord {
        self.close(RecordStatus::Failed, None, Some(error.into()))
    }

    fn close(
        self,
        status: RecordStatus,
        output: Option<Snapshot>,
        error: Option<String>,
    ) -> PhaseRecord {
        PhaseRecord {
            sequence: 0,
            phase: self.phase,
            pass: self.pass,
            status,
            input: self.input,
            context: self.context,
            output,
            error,
            started_at: self.started_at,
            ended_at: Utc::now(),
            attempts: self.attempts,
        }
    }
}

/// A closed phase execution as stored in the execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// 1-based position in the log; assigned on append.
    pub sequence: u32,
    pub phase: PhaseId,
    pub pass: PhasePass,
    pub status: RecordStatus,
    /// Prompt sent to the collaborator.
    pub input: Snapshot,
    /// Context (prior phase outputs) sent alongside the prompt.
    pub context: Snapshot,
    pub output: Option<Snapshot>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attempts: Vec<AttemptRecord>,
}

impl PhaseRecord {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RecordStatus::Succeeded
    }

    /// Whether this record contributes to the task's progress.
    #[must_use]
    pub fn counts_toward_progress(&self) -> bool {
        self.succeeded()
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.ended_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_record_is_pending_until_an_attempt_runs() {
        let mut record = OpenPhaseRecord::open(PhaseId::Analysis, PhasePass::Initial, "p", "c");
        assert_eq!(record.status(), RecordStatus::Pending);
        assert_eq!(record.next_attempt(), 1);

        record.record_attempt(
            Utc::now(),
            4,
            AttemptOutcome::Failed {
                error: "reset".into(),
                retryable: true,
            },
        );
        assert_eq!(record.status(), RecordStatus::Running);
        assert_eq!(record.next_attempt(), 2);
    }

    #[test]
    fn closing_captures_output_hash() {
        let mut record =
            OpenPhaseRecord::open(PhaseId::Implementation, PhasePass::Initial, "p", "c");
        record.record_attempt(Utc::now(), 1, AttemptOutcome::Succeeded);
        let closed = record.succeed("fn main() {}");

        assert!(closed.succeeded());
        assert!(closed.counts_toward_progress());
        let output = closed.output.as_ref().unwrap();
        assert!(output.is_intact());
        assert_eq!(output.hash, content_hash("fn main() {}"));
        assert!(closed.ended_at >= closed.started_at);
    }

    #[test]
    fn failed_record_carries_error() {
        let record =
            OpenPhaseRecord::open(PhaseId::Validation, PhasePass::SelfCorrection, "p", "c")
                .fail("retries exhausted");
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.status.is_closed());
        assert_eq!(record.error.as_deref(), Some("retries exhausted"));
        assert!(record.output.is_none());
    }
}
