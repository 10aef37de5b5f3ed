//! Normalization boundary for raw server payloads
//!
//! The marketplace API returns the same resources in several shapes: flat
//! lists, maps grouped by ad, wrapped envelopes, camelCase or snake_case
//! keys, timestamps as RFC 3339 strings or epoch numbers. Everything is
//! converted to canonical types here; no shape-specific logic may leak past
//! this module.
//!
//! Malformed entities (missing id) are skipped with a warning and the rest
//! of the batch still applies — a bad record never fails a whole fetch.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::conversation::ConversationDelta;
use crate::types::{
    AdContext, Attachment, Conversation, DeliveryStatus, Folder, LastMessage, Message,
    NotificationCategory, ReplyTo,
};

/// Push payload split into the parts the stores consume
#[derive(Debug, Clone, Default)]
pub struct PushDelta {
    pub conversation: Option<ConversationDelta>,
    pub message: Option<Message>,
}

/// Look up the first present key among aliases
fn field<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|key| value.get(key))
}

fn str_field(value: &Value, aliases: &[&str]) -> Option<String> {
    match field(value, aliases)? {
        Value::String(s) => Some(s.clone()),
        // Numeric ids appear in older payloads
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn bool_field(value: &Value, aliases: &[&str]) -> Option<bool> {
    field(value, aliases).and_then(Value::as_bool)
}

fn u64_field(value: &Value, aliases: &[&str]) -> Option<u64> {
    field(value, aliases).and_then(Value::as_u64)
}

/// Parse a timestamp from any of the shapes the server emits
///
/// Accepts RFC 3339 strings, epoch seconds and epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Heuristic: anything past the year 33658 in seconds is millis
            if raw > 1_000_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

fn timestamp_field(value: &Value, aliases: &[&str]) -> Option<DateTime<Utc>> {
    field(value, aliases).and_then(parse_timestamp)
}

/// Convert one raw attachment object
fn normalize_attachment(value: &Value) -> Option<Attachment> {
    Some(Attachment {
        id: str_field(value, &["id", "attachmentId", "attachment_id"])?,
        name: str_field(value, &["name", "filename", "fileName"]).unwrap_or_default(),
        url: str_field(value, &["url", "href"]).unwrap_or_default(),
        mime_type: str_field(value, &["mimeType", "mime_type", "contentType", "content_type"])
            .unwrap_or_default(),
        size_bytes: u64_field(value, &["sizeBytes", "size_bytes", "size"]).unwrap_or(0),
    })
}

fn normalize_reply_to(value: &Value) -> Option<ReplyTo> {
    let raw = field(value, &["replyTo", "reply_to", "inReplyTo", "in_reply_to"])?;
    match raw {
        Value::String(id) => Some(ReplyTo {
            id: id.clone(),
            snapshot: None,
        }),
        Value::Object(_) => Some(ReplyTo {
            id: str_field(raw, &["id", "messageId", "message_id"])?,
            snapshot: str_field(raw, &["snapshot", "content", "text"]),
        }),
        _ => None,
    }
}

/// Convert one raw message object; `None` means the entity is skipped
pub fn normalize_message(value: &Value) -> Option<Message> {
    let id = match str_field(value, &["id", "messageId", "message_id"]) {
        Some(id) => id,
        None => {
            warn!("skipping message without id: {}", value);
            return None;
        }
    };

    let attachments = field(value, &["attachments", "files"])
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(normalize_attachment).collect())
        .unwrap_or_default();

    Some(Message {
        id,
        conversation_id: str_field(value, &["conversationId", "conversation_id", "conversation"])
            .unwrap_or_default(),
        sender_id: str_field(value, &["senderId", "sender_id", "from", "authorId"])
            .unwrap_or_default(),
        content: str_field(value, &["content", "text", "body"]).unwrap_or_default(),
        created_at: timestamp_field(value, &["createdAt", "created_at", "timestamp", "date"])
            .unwrap_or_else(Utc::now),
        is_read: bool_field(value, &["isRead", "is_read", "read"]).unwrap_or(false),
        is_edited: bool_field(value, &["isEdited", "is_edited", "edited"]).unwrap_or(false),
        attachments,
        reply_to: normalize_reply_to(value),
        status: DeliveryStatus::Sent,
    })
}

/// Convert a raw thread payload into a timestamp-sorted message sequence
///
/// Handles all shapes the transport is known to return:
/// - a flat list of messages
/// - a wrapped payload (`{"messages": [...]}` or `{"data": ...}`)
/// - a map grouped by ad id, each value a list of messages
pub fn normalize_thread(conversation_id: &str, payload: &Value) -> Vec<Message> {
    let mut messages = collect_messages(payload);

    for message in &mut messages {
        if message.conversation_id.is_empty() {
            message.conversation_id = conversation_id.to_string();
        }
    }

    messages.sort_by(|a, b| a.thread_cmp(b));
    messages.dedup_by(|a, b| a.id == b.id);
    messages
}

fn collect_messages(payload: &Value) -> Vec<Message> {
    match payload {
        Value::Array(items) => items.iter().filter_map(normalize_message).collect(),
        Value::Object(map) => {
            // Wrapped payload
            if let Some(inner) = field(payload, &["messages", "data", "items", "thread"]) {
                return collect_messages(inner);
            }
            // Single message object
            if map.contains_key("id") || map.contains_key("messageId") {
                return normalize_message(payload).into_iter().collect();
            }
            // Map grouped by ad: every value is a list of messages
            map.values().flat_map(collect_messages).collect()
        }
        _ => {
            debug!("thread payload has no messages: {}", payload);
            Vec::new()
        }
    }
}

fn normalize_ad(value: &Value) -> Option<AdContext> {
    let raw = field(value, &["ad", "adContext", "ad_context"])?;
    match raw {
        Value::String(ad_id) => Some(AdContext {
            ad_id: ad_id.clone(),
            title: None,
        }),
        Value::Object(_) => Some(AdContext {
            ad_id: str_field(raw, &["adId", "ad_id", "id"])?,
            title: str_field(raw, &["title", "name"]),
        }),
        _ => None,
    }
}

fn normalize_last_message(value: &Value) -> Option<LastMessage> {
    let raw = field(value, &["lastMessage", "last_message"])?;
    Some(LastMessage {
        content: str_field(raw, &["content", "text", "body"]).unwrap_or_default(),
        timestamp: timestamp_field(raw, &["timestamp", "createdAt", "created_at", "date"])?,
        is_read: bool_field(raw, &["isRead", "is_read", "read"]).unwrap_or(false),
    })
}

/// Convert one raw conversation object; `None` means the entity is skipped
pub fn normalize_conversation(default_folder: Folder, value: &Value) -> Option<Conversation> {
    let id = match str_field(value, &["id", "conversationId", "conversation_id"]) {
        Some(id) => id,
        None => {
            warn!("skipping conversation without id: {}", value);
            return None;
        }
    };

    let folder = str_field(value, &["folder", "bucket"])
        .and_then(|name| Folder::from_wire(&name))
        .unwrap_or(default_folder);

    Some(Conversation {
        id,
        counterpart_id: str_field(
            value,
            &["counterpartId", "counterpart_id", "userId", "user_id", "interlocutorId"],
        )
        .unwrap_or_default(),
        folder,
        last_message: normalize_last_message(value),
        unread_count: u64_field(value, &["unreadCount", "unread_count"]).unwrap_or(0) as u32,
        is_starred: bool_field(value, &["isStarred", "is_starred", "starred"]).unwrap_or(false),
        is_pinned: bool_field(value, &["isPinned", "is_pinned", "pinned"]).unwrap_or(false),
        ad: normalize_ad(value),
    })
}

/// Convert a raw folder payload into canonical conversation records
pub fn normalize_conversations(folder: Folder, payload: &Value) -> Vec<Conversation> {
    match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| normalize_conversation(folder, v))
            .collect(),
        Value::Object(map) => {
            if let Some(inner) = field(payload, &["conversations", "data", "items"]) {
                return normalize_conversations(folder, inner);
            }
            // Map keyed by conversation id
            map.values()
                .filter_map(|v| normalize_conversation(folder, v))
                .collect()
        }
        _ => {
            debug!("folder payload has no conversations: {}", payload);
            Vec::new()
        }
    }
}

/// Convert a push notification payload into the parts the stores consume
pub fn normalize_push(payload: &Value) -> PushDelta {
    let message = field(payload, &["message", "newMessage", "new_message"])
        .and_then(normalize_message);

    let conversation = field(payload, &["conversation", "conversationDelta"])
        .and_then(|raw| {
            let id = str_field(raw, &["id", "conversationId", "conversation_id"])?;
            Some(ConversationDelta {
                id,
                counterpart_id: str_field(raw, &["counterpartId", "counterpart_id", "userId"]),
                folder: str_field(raw, &["folder", "bucket"])
                    .and_then(|name| Folder::from_wire(&name)),
                last_message: normalize_last_message(raw),
                unread_count: u64_field(raw, &["unreadCount", "unread_count"]).map(|n| n as u32),
                is_starred: bool_field(raw, &["isStarred", "is_starred", "starred"]),
                is_pinned: bool_field(raw, &["isPinned", "is_pinned", "pinned"]),
                ad: normalize_ad(raw),
            })
        })
        .or_else(|| {
            // Some pushes only carry the message; derive a minimal delta so
            // the folder list still reflects the new activity
            let message = message.as_ref()?;
            if message.conversation_id.is_empty() {
                return None;
            }
            Some(ConversationDelta {
                id: message.conversation_id.clone(),
                counterpart_id: Some(message.sender_id.clone()),
                folder: None,
                last_message: Some(LastMessage {
                    content: message.content.clone(),
                    timestamp: message.created_at,
                    is_read: message.is_read,
                }),
                unread_count: None,
                is_starred: None,
                is_pinned: None,
                ad: None,
            })
        });

    PushDelta {
        conversation,
        message,
    }
}

/// Convert a raw notification summary snapshot
///
/// Returns the per-category counts and the notification-id ownership map.
/// Accepts both a flat `{"messages": 2, ...}` object and a wrapped
/// `{"counts": {...}, "items": [{"id": ..., "type": ...}]}` payload.
pub fn normalize_counter_snapshot(
    payload: &Value,
) -> (
    HashMap<NotificationCategory, u32>,
    HashMap<String, NotificationCategory>,
) {
    let mut counts: HashMap<NotificationCategory, u32> = HashMap::new();
    let mut owners: HashMap<String, NotificationCategory> = HashMap::new();

    let counts_obj = field(payload, &["counts", "counters", "summary"]).unwrap_or(payload);
    if let Value::Object(map) = counts_obj {
        for (key, value) in map {
            if let Some(n) = value.as_u64() {
                let category = NotificationCategory::from_tag(key);
                *counts.entry(category).or_insert(0) += n as u32;
            }
        }
    }

    if let Some(items) = field(payload, &["items", "notifications"]).and_then(Value::as_array) {
        for item in items {
            let id = match str_field(item, &["id", "notificationId", "notification_id"]) {
                Some(id) => id,
                None => {
                    warn!("skipping notification without id: {}", item);
                    continue;
                }
            };
            let category = str_field(item, &["type", "tag", "category"])
                .map(|tag| NotificationCategory::from_tag(&tag))
                .unwrap_or(NotificationCategory::Other);
            owners.insert(id, category);
        }
    }

    (counts, owners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_message_round_trip() {
        let raw = json!({
            "id": "m1",
            "conversationId": "c1",
            "senderId": "u2",
            "content": "czesc",
            "createdAt": "2024-05-01T10:00:00Z",
            "isRead": true,
            "attachments": [
                {"id": "a1", "name": "photo.jpg", "url": "https://cdn/a1",
                 "mimeType": "image/jpeg", "sizeBytes": 1024}
            ]
        });

        let msg = normalize_message(&raw).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.content, "czesc");
        assert_eq!(msg.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].id, "a1");
        assert_eq!(msg.attachments[0].mime_type, "image/jpeg");
        assert_eq!(msg.attachments[0].size_bytes, 1024);
    }

    #[test]
    fn test_normalize_message_epoch_millis() {
        let raw = json!({"id": "m1", "timestamp": 1714557600000i64});
        let msg = normalize_message(&raw).unwrap();
        assert_eq!(msg.created_at.timestamp(), 1714557600);
    }

    #[test]
    fn test_missing_id_is_skipped_not_fatal() {
        let payload = json!([
            {"content": "no id here"},
            {"id": "m2", "content": "kept"},
        ]);
        let messages = normalize_thread("c1", &payload);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m2");
        assert_eq!(messages[0].conversation_id, "c1");
    }

    #[test]
    fn test_thread_shapes() {
        let flat = json!([{"id": "m1", "timestamp": 100}, {"id": "m2", "timestamp": 50}]);
        let wrapped = json!({"messages": [{"id": "m1", "timestamp": 100}, {"id": "m2", "timestamp": 50}]});
        let grouped = json!({
            "ad-1": [{"id": "m1", "timestamp": 100}],
            "ad-2": [{"id": "m2", "timestamp": 50}],
        });

        for payload in [flat, wrapped, grouped] {
            let messages = normalize_thread("c1", &payload);
            assert_eq!(messages.len(), 2, "payload: {}", payload);
            // Sorted by timestamp regardless of input shape
            assert_eq!(messages[0].id, "m2");
            assert_eq!(messages[1].id, "m1");
        }
    }

    #[test]
    fn test_thread_duplicate_ids_collapse() {
        let payload = json!([
            {"id": "m1", "timestamp": 100},
            {"id": "m1", "timestamp": 100},
        ]);
        assert_eq!(normalize_thread("c1", &payload).len(), 1);
    }

    #[test]
    fn test_normalize_conversations_shapes() {
        let flat = json!([{"id": "c1", "counterpartId": "u2"}]);
        let wrapped = json!({"conversations": [{"id": "c1", "counterpartId": "u2"}]});
        let keyed = json!({"c1": {"id": "c1", "counterpartId": "u2"}});

        for payload in [flat, wrapped, keyed] {
            let list = normalize_conversations(Folder::Inbox, &payload);
            assert_eq!(list.len(), 1, "payload: {}", payload);
            assert_eq!(list[0].id, "c1");
            assert_eq!(list[0].folder, Folder::Inbox);
        }
    }

    #[test]
    fn test_conversation_wire_folder_wins() {
        let raw = json!({"id": "c1", "folder": "archiwum"});
        let conv = normalize_conversation(Folder::Inbox, &raw).unwrap();
        assert_eq!(conv.folder, Folder::Archived);
    }

    #[test]
    fn test_push_delta_from_message_only() {
        let payload = json!({
            "message": {
                "id": "m9", "conversationId": "c3", "senderId": "u7",
                "content": "nowa oferta", "timestamp": 1714557600
            }
        });
        let delta = normalize_push(&payload);
        let conv = delta.conversation.unwrap();
        assert_eq!(conv.id, "c3");
        assert_eq!(conv.last_message.unwrap().content, "nowa oferta");
        assert_eq!(delta.message.unwrap().id, "m9");
    }

    #[test]
    fn test_counter_snapshot_shapes() {
        let flat = json!({"messages": 2, "payments": 1});
        let (counts, owners) = normalize_counter_snapshot(&flat);
        assert_eq!(counts[&NotificationCategory::Messages], 2);
        assert_eq!(counts[&NotificationCategory::Payments], 1);
        assert!(owners.is_empty());

        let wrapped = json!({
            "counts": {"messages": 1},
            "items": [{"id": "n1", "type": "message"}, {"type": "orphan"}]
        });
        let (counts, owners) = normalize_counter_snapshot(&wrapped);
        assert_eq!(counts[&NotificationCategory::Messages], 1);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners["n1"], NotificationCategory::Messages);
    }
}
