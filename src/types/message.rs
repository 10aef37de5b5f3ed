//! Message and attachment types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A file attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Delivery state of a message as seen by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Optimistic entry, not yet confirmed by the transport
    Delivering,
    /// Confirmed by the transport (or fetched from it)
    Sent,
    /// Send failed; entry is about to be removed
    Failed,
}

/// Reference to the message being replied to
///
/// `snapshot` retains the quoted content captured at compose time so the
/// quote can be rendered even when the original has not been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub id: String,
    pub snapshot: Option<String>,
}

/// One message inside a conversation thread
///
/// The id is stable once confirmed; optimistic entries carry a `tmp-`
/// prefixed id until the transport acknowledges the send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_edited: bool,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplyTo>,
    pub status: DeliveryStatus,
}

impl Message {
    /// Generate a temporary id for an optimistic send
    pub fn temp_id() -> String {
        format!("tmp-{}", uuid::Uuid::new_v4())
    }

    /// Whether this entry is still awaiting confirmation
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Delivering
    }

    /// Strict thread ordering: by creation time, id as tie-break
    pub fn thread_cmp(&self, other: &Message) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            content: "hi".to_string(),
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
            is_read: false,
            is_edited: false,
            attachments: vec![],
            reply_to: None,
            status: DeliveryStatus::Sent,
        }
    }

    #[test]
    fn test_thread_ordering() {
        let a = msg("a", 100);
        let b = msg("b", 200);
        assert_eq!(a.thread_cmp(&b), Ordering::Less);

        // Same timestamp falls back to id
        let c = msg("c", 100);
        assert_eq!(a.thread_cmp(&c), Ordering::Less);
        assert_eq!(c.thread_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn test_temp_id_prefix() {
        let id = Message::temp_id();
        assert!(id.starts_with("tmp-"));
        assert_ne!(id, Message::temp_id());
    }
}
