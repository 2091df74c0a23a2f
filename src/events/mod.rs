//! Notification bus
//!
//! Fire-and-forget delivery of engine notifications to whoever listens
//! (a D-Bus bridge, the CLI, tests).

pub mod types;

pub use types::{ErrorReason, SystemEvent, UsbState};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notification bus for engine events
///
/// Backed by a tokio broadcast channel; every active subscriber receives
/// every event published after it subscribed.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Without subscribers the event is dropped.
    pub fn publish(&self, event: SystemEvent) {
        tracing::debug!("event {}: {:?}", event.event_name(), event);
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain every event currently queued for a receiver
pub fn drain(rx: &mut broadcast::Receiver<SystemEvent>) -> Vec<SystemEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!("event receiver lagged, {} events skipped", skipped);
            }
            Err(_) => break,
        }
    }
    events
}
