use devflow_utils::types::TaskId;

use crate::event::ProgressEvent;

/// Topic name under which a task's events are published.
#[must_use]
pub fn topic_for(task_id: &TaskId) -> String {
    format!("task:{task_id}")
}

/// External real-time transport receiving every published event.
///
/// Called synchronously on the publishing path; implementations should hand
/// the event off (e.g. to a channel) rather than block.
pub trait ProgressRelay: Send + Sync {
    /// # Errors
    ///
    /// Relay failures are logged and never affect task execution.
    fn publish(&self, topic: &str, event: &ProgressEvent) -> anyhow::Result<()>;
}
