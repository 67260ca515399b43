//! Typed publish/subscribe for domain events

use crate::types::FleetEvent;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast bus shared by the supervisor, the PTY layer and the monitor
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: FleetEvent) {
        trace!(agent_id = %event.agent_id(), "emit {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
