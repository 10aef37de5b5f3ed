//! Canonical data types shared across the sync engine
//!
//! Everything past the normalization boundary uses these types; raw
//! server payload shapes never leak into the stores.

pub mod conversation;
pub mod message;
pub mod notification;

pub use conversation::{AdContext, Conversation, ConversationDelta, Folder, LastMessage};
pub use message::{Attachment, DeliveryStatus, Message, ReplyTo};
pub use notification::NotificationCategory;
