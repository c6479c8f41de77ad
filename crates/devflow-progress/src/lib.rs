//! Progress tracking for running tasks.
//!
//! Each task gets its own channel pair: a `watch` holding the latest
//! [`ProgressSnapshot`] and a `broadcast` carrying live [`ProgressEvent`]s.
//! Subscribers receive the snapshot first, then live events; a subscriber
//! that falls behind skips to the latest snapshot instead of replaying
//! history.

mod event;
mod relay;
mod subscription;
mod tracker;

pub use event::{ProgressEvent, ProgressEventKind, ProgressSnapshot};
pub use relay::{ProgressRelay, topic_for};
pub use subscription::ProgressSubscription;
pub use tracker::ProgressTracker;
