//! Client-side synchronization engine for marketplace conversations and
//! notifications.
//!
//! The crate keeps three local stores consistent with a remote backend:
//! folder-scoped conversation lists, the message history of the open
//! conversation and per-category unread counters. All user mutations are
//! optimistic — applied locally first, confirmed or rolled back when the
//! transport answers — and all server push events funnel through a single
//! handler so updates commit in causal order.
//!
//! The [`Transport`] trait is the only seam to the outside; callers plug in
//! their HTTP/WebSocket client and drive everything through [`SyncEngine`].

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod normalize;
pub mod store;
pub mod transport;
pub mod types;

pub use config::SyncConfig;
pub use dispatch::{validate_send, ActionDispatcher};
pub use engine::{SyncEngine, SyncStatus};
pub use error::{Result, SyncError};
pub use events::{EventBus, StoreEvent};
pub use store::{
    ConversationStore, CounterUpdate, LoadOutcome, MergeOutcome, NotificationAggregator,
    ThreadCache, UpsertOutcome,
};
pub use transport::{CancelToken, PushEvent, SendRequest, Transport};
pub use types::{
    AdContext, Attachment, Conversation, ConversationDelta, DeliveryStatus, Folder, LastMessage,
    Message, NotificationCategory, ReplyTo,
};
