//! Conversation and folder types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four fixed conversation buckets
///
/// The marketplace API uses Polish folder names on the wire; both the wire
/// names and the English aliases are accepted when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    Inbox,
    Sent,
    Starred,
    Archived,
}

impl Folder {
    /// Parse a folder from its wire name (Polish or English)
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "odebrane" | "inbox" => Some(Self::Inbox),
            "wyslane" | "wysłane" | "sent" => Some(Self::Sent),
            "ulubione" | "starred" => Some(Self::Starred),
            "archiwum" | "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Wire name expected by the transport
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Inbox => "odebrane",
            Self::Sent => "wyslane",
            Self::Starred => "ulubione",
            Self::Archived => "archiwum",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Starred => "starred",
            Self::Archived => "archived",
        }
    }

    /// All folders, in display order
    pub fn all() -> [Folder; 4] {
        [Self::Inbox, Self::Sent, Self::Starred, Self::Archived]
    }
}

/// Listing the conversation is scoped to, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdContext {
    pub ad_id: String,
    pub title: Option<String>,
}

/// Summary of the most recent message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// One conversation between the current user and a counterpart
///
/// Owned exclusively by the `ConversationStore`; a conversation belongs to
/// exactly one folder at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub counterpart_id: String,
    pub folder: Folder,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub is_starred: bool,
    pub is_pinned: bool,
    pub ad: Option<AdContext>,
}

impl Conversation {
    /// Timestamp of the last message, for ordering (missing sorts last)
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.timestamp)
    }

    /// Whether the conversation holds unread messages
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}

/// Push-derived partial update for one conversation
///
/// Only the fields the push event carried are set; `upsert` merges them
/// into the existing record or creates a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDelta {
    pub id: String,
    pub counterpart_id: Option<String>,
    pub folder: Option<Folder>,
    pub last_message: Option<LastMessage>,
    pub unread_count: Option<u32>,
    pub is_starred: Option<bool>,
    pub is_pinned: Option<bool>,
    pub ad: Option<AdContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_wire_names() {
        assert_eq!(Folder::from_wire("odebrane"), Some(Folder::Inbox));
        assert_eq!(Folder::from_wire("ARCHIWUM"), Some(Folder::Archived));
        assert_eq!(Folder::from_wire("sent"), Some(Folder::Sent));
        assert_eq!(Folder::from_wire("ulubione"), Some(Folder::Starred));
        assert_eq!(Folder::from_wire("spam"), None);
    }

    #[test]
    fn test_folder_round_trip() {
        for folder in Folder::all() {
            assert_eq!(Folder::from_wire(folder.as_wire()), Some(folder));
            assert_eq!(Folder::from_wire(folder.as_str()), Some(folder));
        }
    }
}
