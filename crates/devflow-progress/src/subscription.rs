use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::event::{ProgressEvent, ProgressSnapshot};

/// A subscriber's view of one task: the current snapshot, then live events.
///
/// Dropping the subscription unsubscribes; it never affects execution.
pub struct ProgressSubscription {
    snapshot: watch::Receiver<ProgressSnapshot>,
    live: broadcast::Receiver<ProgressEvent>,
    initial: Option<ProgressEvent>,
    last_seq: u64,
}

impl ProgressSubscription {
    pub(crate) fn new(
        snapshot: watch::Receiver<ProgressSnapshot>,
        live: broadcast::Receiver<ProgressEvent>,
    ) -> Self {
        let initial = ProgressEvent::from_snapshot(&snapshot.borrow());
        Self {
            snapshot,
            live,
            initial: Some(initial),
            last_seq: 0,
        }
    }

    /// Stops receiving events. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}

    /// Next event, or `None` once the task's channel has closed and every
    /// buffered event was delivered.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if let Some(first) = self.initial.take() {
            self.last_seq = first.seq;
            return Some(first);
        }
        loop {
            match self.live.recv().await {
                Ok(event) if event.seq <= self.last_seq => {}
                Ok(event) => {
                    self.last_seq = event.seq;
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    let latest = self.snapshot.borrow().clone();
                    debug!(
                        task_id = %latest.task_id,
                        skipped,
                        "Subscriber lagged; resuming from latest snapshot"
                    );
                    if latest.seq > self.last_seq {
                        self.last_seq = latest.seq;
                        return Some(ProgressEvent::from_snapshot(&latest));
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|event| (event, subscription))
        })
    }
}
