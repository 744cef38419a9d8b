//! Progress channel: ordered, replayable per-job events.

mod log;
mod types;

pub use log::{event_channel, EventLog, EventPublisher, EventSubscription};
pub use types::{EventKind, EventPayload, ProgressEvent};
