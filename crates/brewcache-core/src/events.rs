//! In-process change notifications.
//!
//! Views subscribe to the bus and refresh when a key they display changes,
//! instead of polling the stores.

use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the broadcast channel. Slow receivers skip older events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A flat key was written, removed or cleared.
    StorageChanged { key: String, source: String },
    /// An entity collection changed.
    DataChanged { key: String },
}

impl StoreEvent {
    pub fn key(&self) -> &str {
        match self {
            StoreEvent::StorageChanged { key, .. } | StoreEvent::DataChanged { key } => key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    pub fn storage_changed(&self, key: &str, source: &str) {
        self.publish(StoreEvent::StorageChanged {
            key: key.to_string(),
            source: source.to_string(),
        });
    }

    pub fn data_changed(&self, key: &str) {
        self.publish(StoreEvent::DataChanged {
            key: key.to_string(),
        });
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine
        if self.sender.send(event.clone()).is_err() {
            trace!(key = event.key(), "No event subscribers");
        }
    }
}
