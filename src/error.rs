//! Unified error types for the sync engine
//!
//! This module defines error types that:
//! - Are serializable for frontend consumption
//! - Distinguish errors that block an action (validation) from transient
//!   transport failures that only roll back optimistic state
//! - Never leak transport internals past the engine boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sync engine error type
///
/// All errors are serializable so they can be forwarded to the UI layer.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum SyncError {
    /// Input rejected before any transport call was made
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient transport failure; optimistic state has been rolled back
    #[error("Network error: {0}")]
    Network(String),

    /// The target is in a state that cannot accept this mutation yet,
    /// such as editing a message that is still being delivered
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Session expired; the caller must re-authenticate
    #[error("Authentication required: {0}")]
    Auth(String),

    /// A payload could not be interpreted at the normalization boundary
    #[error("Parse error: {0}")]
    Parse(String),

    /// Conversation not found in the store
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Message not found in the open thread
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The current user does not own the target message
    #[error("Not the owner of message: {0}")]
    NotOwner(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<String> for SyncError {
    fn from(err: String) -> Self {
        SyncError::Other(err)
    }
}

impl From<&str> for SyncError {
    fn from(err: &str) -> Self {
        SyncError::Other(err.to_string())
    }
}

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
