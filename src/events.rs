//! Store change events
//!
//! One explicit event union replaces the scattered ad-hoc subscriptions of
//! the transport layer. Subscribers get a channel receiver; dropping it is
//! the unsubscribe, so handlers cannot leak across reconnects.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::Folder;

/// Event emitted when observable engine state changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreEvent {
    /// The visible list of a folder changed
    ConversationsChanged { folder: Folder },
    /// The open thread changed (new, confirmed, edited or removed messages)
    ThreadChanged { conversation_id: String },
    /// Notification counters changed
    CountersChanged,
    /// Push channel connectivity changed
    ConnectionChanged { online: bool },
    /// The session expired; the user must re-authenticate
    AuthRequired,
    /// Non-fatal notice for the user (e.g. a rolled-back action)
    Notice { message: String },
}

/// Fan-out bus for [`StoreEvent`]s
///
/// Cloning the bus shares the subscriber list. Disconnected receivers are
/// pruned on the next emit.
#[derive(Clone, Default)]
pub struct EventBus {
    senders: Arc<Mutex<Vec<flume::Sender<StoreEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to engine events; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> flume::Receiver<StoreEvent> {
        let (tx, rx) = flume::unbounded();
        self.senders.lock().expect("event bus poisoned").push(tx);
        rx
    }

    /// Emit an event to all live subscribers
    pub fn emit(&self, event: StoreEvent) {
        let mut senders = self.senders.lock().expect("event bus poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        debug!("emitted {:?} to {} subscriber(s)", event, senders.len());
    }

    /// Number of live subscribers (after pruning on last emit)
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().expect("event bus poisoned").len()
    }
}
