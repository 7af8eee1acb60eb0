//! Fire-and-forget delivery of notifications to the observer

use crate::messages::Message;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

/// Outbound notification channel. Sending never fails.
pub trait Notifier: Send + Sync {
    fn send(&self, message: Message);
}

/// Fans messages out to every subscribed observer
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Message>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn send(&self, message: Message) {
        let kind = message.kind();
        // No observer listening is the normal case
        if self.tx.send(message).is_err() {
            trace!("No observer subscribed, dropped {}", kind);
        }
    }
}

/// Emits every message as a structured log event
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: Message) {
        match serde_json::to_string(&message) {
            Ok(payload) => info!(kind = message.kind(), %payload, "notification"),
            Err(e) => warn!("Failed to serialize {} notification: {}", message.kind(), e),
        }
    }
}
