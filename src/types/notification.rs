//! Notification categories

use serde::{Deserialize, Serialize};

/// Fixed notification counter categories
///
/// Unrecognized event tags fall into `Other` rather than raising an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Messages,
    Listings,
    Comments,
    Payments,
    System,
    Preferences,
    Other,
}

impl NotificationCategory {
    /// Map a discriminated event tag to a category
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "message" | "messages" | "new_message" | "chat" => Self::Messages,
            "listing" | "listings" | "ad" | "ogloszenie" => Self::Listings,
            "comment" | "comments" => Self::Comments,
            "payment" | "payments" => Self::Payments,
            "system" => Self::System,
            "preference" | "preferences" => Self::Preferences,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Listings => "listings",
            Self::Comments => "comments",
            Self::Payments => "payments",
            Self::System => "system",
            Self::Preferences => "preferences",
            Self::Other => "other",
        }
    }

    /// All categories, fixed buckets first
    pub fn all() -> [NotificationCategory; 7] {
        [
            Self::Messages,
            Self::Listings,
            Self::Comments,
            Self::Payments,
            Self::System,
            Self::Preferences,
            Self::Other,
        ]
    }
}
