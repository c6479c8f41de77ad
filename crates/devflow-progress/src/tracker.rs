use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use devflow_utils::types::{COMPLETE_PERCENT, PhaseId, PhasePass, TaskId, TaskStatus};

use crate::event::{ProgressEvent, ProgressEventKind, ProgressSnapshot};
use crate::relay::{ProgressRelay, topic_for};
use crate::subscription::ProgressSubscription;

struct Channel {
    snapshot: watch::Sender<ProgressSnapshot>,
    live: broadcast::Sender<ProgressEvent>,
}

impl Channel {
    fn current(&self) -> ProgressSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Fold the update into the snapshot, then broadcast it. Callers hold the
    /// tracker lock, so snapshot and live feed never disagree on ordering.
    fn emit(
        &self,
        kind: ProgressEventKind,
        status: TaskStatus,
        percentage: u8,
        step: String,
        message: Option<String>,
    ) -> ProgressEvent {
        let previous = self.current();
        let now = Utc::now();
        let event = ProgressEvent {
            task_id: previous.task_id.clone(),
            kind,
            seq: previous.seq + 1,
            status,
            percentage,
            step: step.clone(),
            message,
            timestamp: now,
        };
        self.snapshot.send_replace(ProgressSnapshot {
            task_id: previous.task_id,
            status,
            percentage,
            current_step: step,
            seq: event.seq,
            updated_at: now,
        });
        // No live subscribers is fine: the snapshot still holds the update.
        let _ = self.live.send(event.clone());
        event
    }
}

/// Owns per-task progress state and fans updates out to subscribers.
///
/// Percentages only move forward: an update below the stored value is an
/// ordering anomaly, logged and ignored.
pub struct ProgressTracker {
    channels: Mutex<HashMap<TaskId, Channel>>,
    capacity: usize,
    relays: Vec<Arc<dyn ProgressRelay>>,
}

impl ProgressTracker {
    /// `capacity` bounds the live buffer per task; slower subscribers lag.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            relays: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_relay(mut self, relay: Arc<dyn ProgressRelay>) -> Self {
        self.relays.push(relay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a task. Re-registering a tracked task is a no-op.
    pub fn register(&self, task_id: &TaskId, status: TaskStatus, percentage: u8, step: &str) {
        let mut channels = self.lock();
        if channels.contains_key(task_id) {
            return;
        }
        let (snapshot, _) = watch::channel(ProgressSnapshot {
            task_id: task_id.clone(),
            status,
            percentage,
            current_step: step.to_string(),
            seq: 0,
            updated_at: Utc::now(),
        });
        let (live, _) = broadcast::channel(self.capacity);
        channels.insert(task_id.clone(), Channel { snapshot, live });
    }

    /// Stop tracking a task. Subscribers drain buffered events, then end.
    pub fn close(&self, task_id: &TaskId) {
        if self.lock().remove(task_id).is_some() {
            debug!(task_id = %task_id, "Closed progress channel");
        }
    }

    #[must_use]
    pub fn is_tracked(&self, task_id: &TaskId) -> bool {
        self.lock().contains_key(task_id)
    }

    #[must_use]
    pub fn snapshot(&self, task_id: &TaskId) -> Option<ProgressSnapshot> {
        self.lock().get(task_id).map(Channel::current)
    }

    #[must_use]
    pub fn subscriber_count(&self, task_id: &TaskId) -> usize {
        self.lock()
            .get(task_id)
            .map_or(0, |c| c.live.receiver_count())
    }

    /// Snapshot first, then live events. `None` if the task is not tracked.
    #[must_use]
    pub fn subscribe(&self, task_id: &TaskId) -> Option<ProgressSubscription> {
        let channels = self.lock();
        let channel = channels.get(task_id)?;
        Some(ProgressSubscription::new(
            channel.snapshot.subscribe(),
            channel.live.subscribe(),
        ))
    }

    /// Stream of latest snapshots only; intermediate states may be skipped.
    #[must_use]
    pub fn watch(&self, task_id: &TaskId) -> Option<WatchStream<ProgressSnapshot>> {
        self.lock()
            .get(task_id)
            .map(|c| WatchStream::new(c.snapshot.subscribe()))
    }

    /// Move a task's progress forward. Returns whether the update was applied.
    pub fn advance(&self, task_id: &TaskId, percentage: u8, step: &str) -> bool {
        self.forward(task_id, ProgressEventKind::Progress, percentage, step)
    }

    /// Record a finished phase at its checkpoint.
    pub fn phase_complete(&self, task_id: &TaskId, phase: PhaseId, pass: PhasePass) -> bool {
        let step = format!("{} complete", phase.label());
        self.forward(
            task_id,
            ProgressEventKind::PhaseComplete,
            phase.checkpoint(pass),
            &step,
        )
    }

    fn forward(&self, task_id: &TaskId, kind: ProgressEventKind, percentage: u8, step: &str) -> bool {
        let event = {
            let channels = self.lock();
            let Some(channel) = channels.get(task_id) else {
                debug!(task_id = %task_id, "Progress update for untracked task");
                return false;
            };
            let current = channel.current();
            if percentage < current.percentage {
                warn!(
                    task_id = %task_id,
                    current = current.percentage,
                    attempted = percentage,
                    step = %step,
                    "Ignoring out-of-order progress update"
                );
                return false;
            }
            if percentage == current.percentage || current.status.is_terminal() {
                return false;
            }
            channel.emit(
                kind,
                current.status,
                percentage.min(COMPLETE_PERCENT),
                step.to_string(),
                None,
            )
        };
        self.relay(&event);
        true
    }

    /// Publish a status change without moving the percentage.
    pub fn set_status(&self, task_id: &TaskId, status: TaskStatus, step: &str) {
        self.publish_status(task_id, ProgressEventKind::Progress, status, step, None);
    }

    /// Terminal success: 100%.
    pub fn complete(&self, task_id: &TaskId) {
        let event = {
            let channels = self.lock();
            let Some(channel) = channels.get(task_id) else {
                return;
            };
            channel.emit(
                ProgressEventKind::Completion,
                TaskStatus::Completed,
                COMPLETE_PERCENT,
                "Completed".to_string(),
                None,
            )
        };
        self.relay(&event);
    }

    /// Terminal failure or cancellation; the percentage stays where it was.
    pub fn fail(&self, task_id: &TaskId, status: TaskStatus, message: &str) {
        let step = match status {
            TaskStatus::Cancelled => "Cancelled",
            _ => "Failed",
        };
        self.publish_status(
            task_id,
            ProgressEventKind::Error,
            status,
            step,
            Some(message.to_string()),
        );
    }

    fn publish_status(
        &self,
        task_id: &TaskId,
        kind: ProgressEventKind,
        status: TaskStatus,
        step: &str,
        message: Option<String>,
    ) {
        let event = {
            let channels = self.lock();
            let Some(channel) = channels.get(task_id) else {
                return;
            };
            let current = channel.current();
            channel.emit(kind, status, current.percentage, step.to_string(), message)
        };
        self.relay(&event);
    }

    fn relay(&self, event: &ProgressEvent) {
        if self.relays.is_empty() {
            return;
        }
        let topic = topic_for(&event.task_id);
        for relay in &self.relays {
            if let Err(e) = relay.publish(&topic, event) {
                warn!(topic = %topic, error = %e, "Progress relay failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracked(id: &str) -> (ProgressTracker, TaskId) {
        let tracker = ProgressTracker::new(16);
        let task_id = TaskId::new(id);
        tracker.register(&task_id, TaskStatus::Running, 0, "Starting");
        (tracker, task_id)
    }

    struct Recording(Mutex<Vec<(String, u8)>>);

    impl ProgressRelay for Recording {
        fn publish(&self, topic: &str, event: &ProgressEvent) -> anyhow::Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((topic.to_string(), event.percentage));
            Ok(())
        }
    }

    struct Broken;

    impl ProgressRelay for Broken {
        fn publish(&self, _topic: &str, _event: &ProgressEvent) -> anyhow::Result<()> {
            anyhow::bail!("transport down")
        }
    }

    #[test]
    fn lower_updates_are_ignored() {
        let (tracker, id) = tracked("t-1");
        assert!(tracker.advance(&id, 50, "Implementation"));
        assert!(!tracker.advance(&id, 25, "Architecture"));
        assert!(!tracker.advance(&id, 50, "Implementation"));
        let snapshot = tracker.snapshot(&id).unwrap();
        assert_eq!(snapshot.percentage, 50);
        assert_eq!(snapshot.current_step, "Implementation");
        assert_eq!(snapshot.seq, 1);
    }

    #[test]
    fn phase_complete_uses_checkpoints() {
        let (tracker, id) = tracked("t-1");
        assert!(tracker.phase_complete(&id, PhaseId::Analysis, PhasePass::Initial));
        assert_eq!(tracker.snapshot(&id).unwrap().percentage, 15);
        assert!(tracker.phase_complete(&id, PhaseId::Implementation, PhasePass::SelfCorrection));
        assert_eq!(tracker.snapshot(&id).unwrap().percentage, 92);
    }

    #[test]
    fn updates_after_terminal_are_ignored() {
        let (tracker, id) = tracked("t-1");
        tracker.fail(&id, TaskStatus::Cancelled, "cancelled by user");
        assert!(!tracker.advance(&id, 65, "late"));
        let snapshot = tracker.snapshot(&id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert_eq!(snapshot.percentage, 0);
    }

    #[test]
    fn untracked_tasks_are_ignored() {
        let tracker = ProgressTracker::new(4);
        assert!(!tracker.advance(&TaskId::new("nope"), 10, "x"));
        assert!(tracker.subscribe(&TaskId::new("nope")).is_none());
        assert!(tracker.snapshot(&TaskId::new("nope")).is_none());
    }

    #[test]
    fn relays_receive_topic_and_failures_are_contained() {
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        let tracker = ProgressTracker::new(4)
            .with_relay(Arc::new(Broken))
            .with_relay(recording.clone());
        let id = TaskId::new("t-7");
        tracker.register(&id, TaskStatus::Running, 0, "Starting");
        tracker.advance(&id, 15, "Analysis");
        tracker.complete(&id);

        let seen = recording.0.lock().unwrap().clone();
        assert_eq!(seen, vec![("task:t-7".to_string(), 15), ("task:t-7".to_string(), 100)]);
    }

    #[test]
    fn close_stops_tracking() {
        let (tracker, id) = tracked("t-1");
        tracker.close(&id);
        assert!(!tracker.is_tracked(&id));
        assert!(!tracker.advance(&id, 15, "Analysis"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            devflow_utils::test_support::proptest_cases(64)
        ))]

        #[test]
        fn snapshot_is_running_maximum(updates in prop::collection::vec(0u8..100, 0..40)) {
            let (tracker, id) = tracked("t-prop");
            let mut expected = 0u8;
            for pct in updates {
                let applied = tracker.advance(&id, pct, "step");
                prop_assert_eq!(applied, pct > expected);
                expected = expected.max(pct);
                prop_assert_eq!(tracker.snapshot(&id).unwrap().percentage, expected);
            }
        }
    }
}
