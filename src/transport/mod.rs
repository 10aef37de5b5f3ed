//! Transport collaborator contract
//!
//! The REST operations and the push event channel are implemented outside
//! this crate; the engine only consumes this trait. Fetch operations return
//! raw `serde_json::Value` payloads because the server emits several shapes
//! for the same resource — conversion to canonical types happens at the
//! single normalization boundary (`crate::normalize`), never here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{Attachment, Folder, ReplyTo};

#[cfg(test)]
pub(crate) mod mock;

/// Cooperative cancellation signal for in-flight fetches
///
/// Switching the active folder or closing the open conversation cancels the
/// corresponding fetch; a well-behaved transport checks the token and bails
/// out early. The stores additionally discard any response whose epoch no
/// longer matches, so a transport that ignores the token is still safe.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outgoing send request, already validated by the dispatcher
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub conversation_id: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplyTo>,
}

/// One push event from the server-originated channel
///
/// The ad-hoc `on`/`off` event names of the wire protocol are folded into a
/// single union so subscribers cannot leak handlers across reconnects.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A new notification arrived; `payload` is the raw, unnormalized body
    Notification { id: String, tag: String, payload: Value },
    /// An existing notification changed (no counter increment)
    NotificationUpdated { id: String, tag: String, payload: Value },
    /// The server cleared all unread notifications
    AllNotificationsRead,
    /// A notification was removed server-side
    NotificationDeleted { id: String },
    /// Push channel (re)connected
    Connect,
    /// Push channel dropped
    Disconnect,
}

/// REST + push contract consumed by the sync engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the conversations of one folder (raw payload)
    async fn fetch_conversations(&self, folder: Folder, cancel: &CancelToken) -> Result<Value>;

    /// Fetch the full message history of a conversation (raw payload;
    /// may be a flat list, a map grouped by ad, or a wrapped object)
    async fn fetch_thread(&self, conversation_id: &str, cancel: &CancelToken) -> Result<Value>;

    /// Fetch the authoritative notification counter snapshot
    async fn fetch_notification_summary(&self) -> Result<Value>;

    /// Send a message; returns the canonical message as a raw payload
    async fn send_message(&self, request: SendRequest) -> Result<Value>;

    /// Edit an owned message; returns the updated message payload
    async fn edit_message(&self, id: &str, content: &str) -> Result<Value>;

    /// Delete an owned message
    async fn delete_message(&self, id: &str) -> Result<()>;

    /// Archive a message for the current user only (the thread keeps it)
    async fn archive_message(&self, id: &str) -> Result<()>;

    /// Retract an owned message for all participants
    async fn unsend_message(&self, id: &str) -> Result<()>;

    /// Toggle the star on a conversation
    async fn star_conversation(&self, id: &str) -> Result<()>;

    /// Move a conversation to the archive folder
    async fn archive_conversation(&self, id: &str) -> Result<()>;

    /// Move a conversation to an arbitrary folder
    async fn move_conversation(&self, id: &str, folder: Folder) -> Result<()>;

    /// Delete a conversation
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    /// Subscribe to the push channel; every event arrives on the returned
    /// receiver, dropping it unsubscribes
    fn subscribe(&self) -> flume::Receiver<PushEvent>;
}
