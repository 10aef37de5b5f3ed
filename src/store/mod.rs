//! State stores reconciling REST fetches, optimistic mutations and push events

pub mod conversations;
pub mod notifications;
pub mod thread;

pub use conversations::{ConversationStore, LoadOutcome, UpsertOutcome};
pub use notifications::{CounterUpdate, NotificationAggregator};
pub use thread::{MergeOutcome, ThreadCache};
