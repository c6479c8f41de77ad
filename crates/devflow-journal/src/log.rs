use serde::{Deserialize, Serialize};
use thiserror::Error;

use devflow_utils::canonicalization::{content_hash, emit_jcs};
use devflow_utils::types::{PhaseId, PhasePass, TaskId};

use crate::record::{PhaseRecord, Snapshot};

/// A phase runs at most once per pass, and there are two passes.
pub const MAX_RECORDS_PER_PHASE: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JournalError {
    #[error("Phase '{phase}' already has {max} records")]
    TooManyRecords { phase: PhaseId, max: usize },

    #[error("Record for '{phase}' ({pass}) cannot follow '{after}' ({after_pass})")]
    OutOfOrder {
        phase: PhaseId,
        pass: PhasePass,
        after: PhaseId,
        after_pass: PhasePass,
    },

    #[error("Phase '{phase}' is not re-run during self-correction")]
    NotCorrectable { phase: PhaseId },

    #[error("Record {sequence} is not closed")]
    NotClosed { sequence: u32 },

    #[error("Expected record sequence {expected}, found {found}")]
    SequenceGap { expected: u32, found: u32 },

    #[error("Record {sequence} has attempts out of order")]
    AttemptGap { sequence: u32 },

    #[error("Record {sequence} {field} hash does not match its content")]
    HashMismatch { sequence: u32, field: &'static str },
}

/// Ordered, append-only list of a task's phase records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    task_id: TaskId,
    records: Vec<PhaseRecord>,
}

impl ExecutionLog {
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    pub fn records_for(&self, phase: PhaseId) -> impl Iterator<Item = &PhaseRecord> {
        self.records.iter().filter(move |r| r.phase == phase)
    }

    /// Output of the most recent record of `phase` that counts toward progress.
    #[must_use]
    pub fn latest_output(&self, phase: PhaseId) -> Option<&Snapshot> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.phase == phase && r.counts_toward_progress())
            .find_map(|r| r.output.as_ref())
    }

    /// Append a closed record, assigning its sequence number.
    ///
    /// # Errors
    ///
    /// Rejects records that would break phase ordering or exceed
    /// [`MAX_RECORDS_PER_PHASE`].
    pub fn append(&mut self, mut record: PhaseRecord) -> Result<&PhaseRecord, JournalError> {
        if !record.status.is_closed() {
            return Err(JournalError::NotClosed {
                sequence: record.sequence,
            });
        }
        if self.records_for(record.phase).count() >= MAX_RECORDS_PER_PHASE {
            return Err(JournalError::TooManyRecords {
                phase: record.phase,
                max: MAX_RECORDS_PER_PHASE,
            });
        }
        check_order(self.records.last(), &record)?;

        record.sequence = u32::try_from(self.records.len()).unwrap_or(u32::MAX).saturating_add(1);
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Re-check every invariant of the log: sequence numbering, phase order,
    /// per-phase record count, attempt numbering, and snapshot hashes.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn verify(&self) -> Result<(), JournalError> {
        let mut previous: Option<&PhaseRecord> = None;
        for (index, record) in self.records.iter().enumerate() {
            let expected = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if record.sequence != expected {
                return Err(JournalError::SequenceGap {
                    expected,
                    found: record.sequence,
                });
            }
            if !record.status.is_closed() {
                return Err(JournalError::NotClosed {
                    sequence: record.sequence,
                });
            }
            check_order(previous, record)?;

            let attempts_numbered = record
                .attempts
                .iter()
                .zip(1u32..)
                .all(|(attempt, n)| attempt.attempt == n);
            if !attempts_numbered {
                return Err(JournalError::AttemptGap {
                    sequence: record.sequence,
                });
            }

            let snapshots = [
                ("input", Some(&record.input)),
                ("context", Some(&record.context)),
                ("output", record.output.as_ref()),
            ];
            for (field, snapshot) in snapshots {
                if snapshot.is_some_and(|s| !s.is_intact()) {
                    return Err(JournalError::HashMismatch {
                        sequence: record.sequence,
                        field,
                    });
                }
            }
            previous = Some(record);
        }

        for phase in PhaseId::all() {
            if self.records_for(phase).count() > MAX_RECORDS_PER_PHASE {
                return Err(JournalError::TooManyRecords {
                    phase,
                    max: MAX_RECORDS_PER_PHASE,
                });
            }
        }
        Ok(())
    }

    /// Highest checkpoint reached by records that count toward progress.
    ///
    /// This is the authoritative percentage for any non-completed task; a
    /// completed task reports 100.
    #[must_use]
    pub fn replay_progress(&self) -> u8 {
        self.records
            .iter()
            .filter(|r| r.counts_toward_progress())
            .map(|r| r.phase.checkpoint(r.pass))
            .max()
            .unwrap_or(0)
    }

    /// Canonical JSON (RFC 8785) of the whole log.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails.
    pub fn export_jcs(&self) -> anyhow::Result<String> {
        emit_jcs(self)
    }

    /// blake3 digest of the canonical export.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails.
    pub fn digest(&self) -> anyhow::Result<String> {
        Ok(content_hash(&self.export_jcs()?))
    }
}

fn check_order(previous: Option<&PhaseRecord>, record: &PhaseRecord) -> Result<(), JournalError> {
    if record.pass == PhasePass::SelfCorrection
        && !PhaseId::CORRECTION_SEQUENCE.contains(&record.phase)
    {
        return Err(JournalError::NotCorrectable {
            phase: record.phase,
        });
    }

    let Some(previous) = previous else {
        return Ok(());
    };
    let in_order = match (previous.pass, record.pass) {
        (PhasePass::Initial, PhasePass::Initial)
        | (PhasePass::SelfCorrection, PhasePass::SelfCorrection) => {
            record.phase.index() > previous.phase.index()
        }
        (PhasePass::Initial, PhasePass::SelfCorrection) => true,
        (PhasePass::SelfCorrection, PhasePass::Initial) => false,
    };
    if in_order {
        Ok(())
    } else {
        Err(JournalError::OutOfOrder {
            phase: record.phase,
            pass: record.pass,
            after: previous.phase,
            after_pass: previous.pass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AttemptOutcome, OpenPhaseRecord};
    use chrono::Utc;
    use proptest::prelude::*;

    fn closed(phase: PhaseId, pass: PhasePass) -> PhaseRecord {
        let mut record = OpenPhaseRecord::open(phase, pass, "prompt", "context");
        record.record_attempt(Utc::now(), 2, AttemptOutcome::Succeeded);
        record.succeed(&format!("{phase} output"))
    }

    fn full_initial_pass() -> ExecutionLog {
        let mut log = ExecutionLog::new(TaskId::new("t-1"));
        for phase in PhaseId::SEQUENCE {
            log.append(closed(phase, PhasePass::Initial)).unwrap();
        }
        log
    }

    #[test]
    fn initial_pass_appends_in_sequence() {
        let log = full_initial_pass();
        assert_eq!(log.len(), 6);
        let sequences: Vec<u32> = log.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
        assert!(log.verify().is_ok());
        assert_eq!(log.replay_progress(), 90);
    }

    #[test]
    fn correction_pass_follows_initial_pass() {
        let mut log = full_initial_pass();
        for phase in PhaseId::CORRECTION_SEQUENCE {
            log.append(closed(phase, PhasePass::SelfCorrection)).unwrap();
        }
        assert!(log.verify().is_ok());
        assert_eq!(log.records_for(PhaseId::Implementation).count(), 2);
        assert_eq!(log.replay_progress(), 98);
        assert_eq!(
            log.latest_output(PhaseId::Implementation).unwrap().content,
            "implementation output"
        );
    }

    #[test]
    fn out_of_order_append_is_rejected() {
        let mut log = ExecutionLog::new(TaskId::new("t-1"));
        log.append(closed(PhaseId::Architecture, PhasePass::Initial))
            .unwrap();
        let err = log
            .append(closed(PhaseId::Analysis, PhasePass::Initial))
            .unwrap_err();
        assert!(matches!(err, JournalError::OutOfOrder { .. }));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn analysis_is_not_correctable() {
        let mut log = full_initial_pass();
        let err = log
            .append(closed(PhaseId::Analysis, PhasePass::SelfCorrection))
            .unwrap_err();
        assert_eq!(
            err,
            JournalError::NotCorrectable {
                phase: PhaseId::Analysis
            }
        );
    }

    #[test]
    fn third_record_for_a_phase_is_rejected() {
        let mut log = full_initial_pass();
        log.append(closed(PhaseId::Implementation, PhasePass::SelfCorrection))
            .unwrap();
        let err = log
            .append(closed(PhaseId::Implementation, PhasePass::SelfCorrection))
            .unwrap_err();
        assert!(matches!(err, JournalError::TooManyRecords { .. }));
    }

    #[test]
    fn verify_detects_tampered_output() {
        let log = full_initial_pass();
        let json = serde_json::to_string(&log).unwrap();
        let tampered = json.replacen("analysis output", "edited output", 1);
        let log: ExecutionLog = serde_json::from_str(&tampered).unwrap();
        assert_eq!(
            log.verify(),
            Err(JournalError::HashMismatch {
                sequence: 1,
                field: "output"
            })
        );
    }

    #[test]
    fn failed_records_do_not_advance_progress() {
        let mut log = ExecutionLog::new(TaskId::new("t-1"));
        log.append(closed(PhaseId::Analysis, PhasePass::Initial))
            .unwrap();
        log.append(
            OpenPhaseRecord::open(PhaseId::Architecture, PhasePass::Initial, "p", "c")
                .fail("boom"),
        )
        .unwrap();
        assert_eq!(log.replay_progress(), 15);
        assert!(log.latest_output(PhaseId::Architecture).is_none());
    }

    #[test]
    fn export_is_canonical_and_stable() {
        let log = full_initial_pass();
        let first = log.export_jcs().unwrap();
        let reparsed: ExecutionLog = serde_json::from_str(&first).unwrap();
        assert_eq!(reparsed.export_jcs().unwrap(), first);
        assert_eq!(log.digest().unwrap(), reparsed.digest().unwrap());
        assert!(first.starts_with("{\"records\":"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            devflow_utils::test_support::proptest_cases(64)
        ))]

        #[test]
        fn accepted_appends_always_verify(picks in prop::collection::vec((0usize..6, any::<bool>()), 0..20)) {
            let mut log = ExecutionLog::new(TaskId::new("t-prop"));
            for (index, correction) in picks {
                let pass = if correction { PhasePass::SelfCorrection } else { PhasePass::Initial };
                let _ = log.append(closed(PhaseId::SEQUENCE[index], pass));
            }
            prop_assert!(log.verify().is_ok());
            for phase in PhaseId::all() {
                prop_assert!(log.records_for(phase).count() <= MAX_RECORDS_PER_PHASE);
            }
        }
    }
}
