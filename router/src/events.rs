//! Fan-out of fleet events to SSE subscribers and the webhook queue.

use tokio::sync::{broadcast, mpsc};

use fleet_common::FleetEvent;

const BROADCAST_CAPACITY: usize = 256;

/// Publishes every event to live subscribers and, if configured, to the
/// bounded webhook queue.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
    webhooks: Option<mpsc::Sender<FleetEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx, webhooks: None }
    }

    /// Also forward events to the webhook dispatcher queue.
    pub fn with_webhooks(mut self, queue: mpsc::Sender<FleetEvent>) -> Self {
        self.webhooks = Some(queue);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Never blocks; a full webhook queue drops the event.
    pub fn publish(&self, event: FleetEvent) {
        if let Some(queue) = &self.webhooks {
            match queue.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    tracing::warn!(event = dropped.kind(), "Webhook queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Webhook queue closed");
                }
            }
        }

        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
