//! Where pipeline events go.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use citeweave_shared::{PipelineEvent, StatusEvent};

/// Receiver of status, message and citation events for one request.
///
/// Emission is fire-and-forget: a sink that can no longer deliver drops the
/// event rather than failing the request.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Forward events to a host task over a channel.
impl EventSink for mpsc::UnboundedSender<PipelineEvent> {
    fn emit(&self, event: PipelineEvent) {
        if self.send(event).is_err() {
            trace!("event receiver dropped, discarding event");
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<StatusEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Concatenated content of all message events.
    pub fn transcript(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::Message(message) => Some(message.content),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
