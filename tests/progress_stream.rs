//! Integration Tests for progress streaming
//!
//! Subscribers see the current snapshot first and then live events whose
//! percentage never decreases. Relays receive the same events under the
//! task's topic.

#[path = "test_support/mod.rs"]
mod test_support;

use std::sync::{Arc, Mutex};

use futures::StreamExt;

use devflow::config::Config;
use devflow::llm::{ScriptStep, passing};
use devflow::progress::{ProgressEvent, ProgressEventKind, ProgressRelay, topic_for};
use devflow::{Orchestrator, PhaseId, TaskStatus};

use test_support::*;

fn assert_non_decreasing(events: &[ProgressEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[0].percentage <= pair[1].percentage,
            "progress went backwards: {} -> {}",
            pair[0].percentage,
            pair[1].percentage
        );
        assert!(pair[0].seq < pair[1].seq);
    }
}

#[tokio::test]
async fn early_subscriber_sees_every_checkpoint() {
    let h = harness().build();
    let id = h.orchestrator.submit(sample_spec("acme")).await.unwrap();
    let subscription = h.orchestrator.subscribe(&id).unwrap();

    let worker = h.orchestrator.spawn(id.clone());
    let events: Vec<ProgressEvent> = subscription.into_stream().collect().await;
    worker.await.unwrap().unwrap();

    assert_eq!(events[0].status, TaskStatus::Queued);
    assert_eq!(events[0].percentage, 0);
    assert_non_decreasing(&events);

    let checkpoints: Vec<u8> = events
        .iter()
        .filter(|e| e.kind == ProgressEventKind::PhaseComplete)
        .map(|e| e.percentage)
        .collect();
    assert_eq!(checkpoints, vec![15, 25, 50, 65, 80, 90]);

    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressEventKind::Completion);
    assert_eq!(last.percentage, 100);
    assert!(last.is_terminal());
}

#[tokio::test]
async fn late_subscriber_starts_from_the_current_snapshot() {
    let (hold, gate) = ScriptStep::hold(envelope(CLEAN_IMPLEMENTATION, 0.95));
    let backend = passing().with_script(PhaseId::Implementation, [hold]);
    let h = harness().backend(backend).build();
    let id = h.orchestrator.submit(sample_spec("acme")).await.unwrap();

    let worker = h.orchestrator.spawn(id.clone());
    gate.entered().await;

    let mut subscription = h.orchestrator.subscribe(&id).unwrap();
    let first = subscription.recv().await.unwrap();
    assert_eq!(first.status, TaskStatus::Running);
    assert_eq!(first.percentage, 25);
    assert_eq!(first.step, "Architecture complete");

    gate.release();
    let mut events = vec![first];
    while let Some(event) = subscription.recv().await {
        events.push(event);
    }
    worker.await.unwrap().unwrap();

    assert_non_decreasing(&events);
    assert_eq!(events.last().unwrap().percentage, 100);
    assert!(events.iter().all(|e| e.percentage >= 25));
}

#[tokio::test]
async fn self_correction_progress_stays_below_completion() {
    let backend = passing().with_script(
        PhaseId::TestGeneration,
        [ScriptStep::respond(envelope(MISSING_TESTS, 0.9))],
    );
    let h = harness().backend(backend).build();
    let id = h.orchestrator.submit(sample_spec("acme")).await.unwrap();
    let subscription = h.orchestrator.subscribe(&id).unwrap();

    let worker = h.orchestrator.spawn(id.clone());
    let events: Vec<ProgressEvent> = subscription.into_stream().collect().await;
    worker.await.unwrap().unwrap();

    assert_non_decreasing(&events);
    assert!(
        events
            .iter()
            .any(|e| e.status == TaskStatus::SelfCorrecting)
    );
    let corrective: Vec<u8> = events
        .iter()
        .filter(|e| e.kind == ProgressEventKind::PhaseComplete && e.percentage > 90)
        .map(|e| e.percentage)
        .collect();
    assert_eq!(corrective, vec![92, 94, 96, 98]);
}

#[tokio::test]
async fn cancellation_ends_the_stream_with_an_error_event() {
    let h = harness().build();
    let id = h.orchestrator.submit(sample_spec("acme")).await.unwrap();
    let subscription = h.orchestrator.subscribe(&id).unwrap();

    h.orchestrator.cancel(&id).await.unwrap();
    let events: Vec<ProgressEvent> = subscription.into_stream().collect().await;

    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressEventKind::Error);
    assert_eq!(last.status, TaskStatus::Cancelled);
    assert_eq!(last.percentage, 0);
    assert!(h.orchestrator.subscribe(&id).is_none());
}

#[tokio::test]
async fn dropped_subscribers_do_not_affect_execution() {
    let h = harness().build();
    let id = h.orchestrator.submit(sample_spec("acme")).await.unwrap();

    h.orchestrator.subscribe(&id).unwrap().unsubscribe();
    drop(h.orchestrator.subscribe(&id).unwrap());
    let mut kept = h.orchestrator.subscribe(&id).unwrap();

    let task = h.orchestrator.run(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let mut last = None;
    while let Some(event) = kept.recv().await {
        last = Some(event);
    }
    assert_eq!(last.unwrap().percentage, 100);
}

#[derive(Default)]
struct RecordingRelay {
    published: Mutex<Vec<(String, u8)>>,
}

impl ProgressRelay for RecordingRelay {
    fn publish(&self, topic: &str, event: &ProgressEvent) -> anyhow::Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), event.percentage));
        Ok(())
    }
}

#[tokio::test]
async fn relays_receive_events_under_the_task_topic() {
    let relay = Arc::new(RecordingRelay::default());
    let orchestrator = Orchestrator::builder(Config::minimal_for_testing())
        .backend(Arc::new(passing()))
        .relay(Arc::clone(&relay) as _)
        .build()
        .unwrap();
    let id = orchestrator.submit(sample_spec("acme")).await.unwrap();
    orchestrator.run(&id).await.unwrap();

    let published = relay.published.lock().unwrap().clone();
    let topic = topic_for(&id);
    assert!(published.iter().all(|(t, _)| *t == topic));
    assert_eq!(published.last().unwrap().1, 100);
}
