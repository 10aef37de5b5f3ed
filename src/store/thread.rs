//! Message thread cache
//!
//! Canonical ordered message list for the currently open conversation.
//! Merges three sources: fetched history, optimistic sends and pushed
//! messages. Pushed messages are reconciled against pending optimistic
//! entries by sender + content within a bounded time window, because the
//! transport guarantees no correlation id.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::normalize;
use crate::store::conversations::LoadOutcome;
use crate::transport::CancelToken;
use crate::types::{Attachment, DeliveryStatus, Message, ReplyTo};

/// Outcome of merging a pushed message into the open thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The push confirmed a pending optimistic send (carries the temp id)
    ConfirmedPending(String),
    /// A genuinely new message was appended
    Appended,
    /// The message id was already present; duplicate delivery ignored
    Duplicate,
    /// No thread is open for this conversation
    NotOpen,
}

/// Ordered message history of the open conversation
pub struct ThreadCache {
    open_id: Option<String>,
    messages: Vec<Message>,
    epoch: u64,
    inflight_cancel: Option<CancelToken>,
    /// Pre-mutation snapshots for optimistic edit/unsend/delete
    reverts: HashMap<String, Message>,
    /// Client-only tombstones ("delete for me"), session-scoped
    hidden: HashSet<String>,
    user_id: String,
}

impl ThreadCache {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            open_id: None,
            messages: Vec::new(),
            epoch: 0,
            inflight_cancel: None,
            reverts: HashMap::new(),
            hidden: HashSet::new(),
            user_id: user_id.into(),
        }
    }

    /// Begin opening a conversation; cancels the previous fetch
    pub fn begin_open(&mut self, conversation_id: &str) -> (u64, CancelToken) {
        if let Some(cancel) = self.inflight_cancel.take() {
            cancel.cancel();
        }
        self.epoch += 1;
        self.open_id = Some(conversation_id.to_string());
        self.messages.clear();
        self.reverts.clear();
        let token = CancelToken::new();
        self.inflight_cancel = Some(token.clone());
        (self.epoch, token)
    }

    /// Apply a completed history fetch; stale epochs are discarded
    pub fn complete_open(
        &mut self,
        conversation_id: &str,
        epoch: u64,
        payload: &Value,
    ) -> LoadOutcome {
        if epoch != self.epoch || self.open_id.as_deref() != Some(conversation_id) {
            debug!(
                "discarding stale thread response for {} (epoch {} != {})",
                conversation_id, epoch, self.epoch
            );
            return LoadOutcome::Stale;
        }
        self.inflight_cancel = None;

        let fetched = normalize::normalize_thread(conversation_id, payload);
        // Fetch replaces history but keeps optimistic entries that are
        // still awaiting confirmation
        let mut pending: Vec<Message> =
            self.messages.drain(..).filter(Message::is_pending).collect();
        self.messages = fetched;
        self.messages.retain(|m| !m.is_pending());
        self.messages.append(&mut pending);
        self.resort();
        LoadOutcome::Applied(self.messages.len())
    }

    /// Close the open thread and cancel any in-flight fetch
    pub fn close(&mut self) {
        if let Some(cancel) = self.inflight_cancel.take() {
            cancel.cancel();
        }
        self.epoch += 1;
        self.open_id = None;
        self.messages.clear();
        self.reverts.clear();
    }

    /// Conversation currently open, if any
    pub fn open_id(&self) -> Option<&str> {
        self.open_id.as_deref()
    }

    /// Whether the given conversation is the open one
    pub fn is_open(&self, conversation_id: &str) -> bool {
        self.open_id.as_deref() == Some(conversation_id)
    }

    /// All messages except local tombstones, in thread order
    pub fn visible_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| !self.hidden.contains(&m.id))
            .collect()
    }

    /// Full canonical list, including hidden messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn find(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Insert an optimistic send with a temporary id
    pub fn append_optimistic(
        &mut self,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<ReplyTo>,
    ) -> Result<Message> {
        let conversation_id = self
            .open_id
            .clone()
            .ok_or_else(|| SyncError::Other("no open conversation".to_string()))?;
        let message = Message {
            id: Message::temp_id(),
            conversation_id,
            sender_id: self.user_id.clone(),
            content,
            created_at: Utc::now(),
            is_read: true,
            is_edited: false,
            attachments,
            reply_to,
            status: DeliveryStatus::Delivering,
        };
        self.messages.push(message.clone());
        self.resort();
        Ok(message)
    }

    /// Replace a temporary entry with the canonical confirmed message
    pub fn confirm(&mut self, temp_id: &str, mut canonical: Message) -> bool {
        // Duplicate guard: the push channel may have delivered the
        // canonical message before the REST confirmation
        if self.messages.iter().any(|m| m.id == canonical.id) {
            self.messages.retain(|m| m.id != temp_id);
            self.resort();
            return true;
        }
        match self.messages.iter_mut().find(|m| m.id == temp_id) {
            Some(slot) => {
                canonical.status = DeliveryStatus::Sent;
                *slot = canonical;
                self.resort();
                true
            }
            None => false,
        }
    }

    /// Remove a failed optimistic entry, restoring the pre-send thread
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        before != self.messages.len()
    }

    /// Merge a pushed message into the open thread
    ///
    /// A pending optimistic entry with the same sender and content arriving
    /// within `window` is treated as the confirmation of that entry rather
    /// than a new message.
    pub fn merge_incoming(&mut self, message: Message, window: Duration) -> MergeOutcome {
        if self.open_id.as_deref() != Some(message.conversation_id.as_str()) {
            return MergeOutcome::NotOpen;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            debug!("duplicate push delivery for message {}", message.id);
            return MergeOutcome::Duplicate;
        }

        let matching_pending = self.messages.iter().find_map(|m| {
            let within_window = (message.created_at - m.created_at).abs() <= window;
            if m.is_pending()
                && m.sender_id == message.sender_id
                && m.content == message.content
                && within_window
            {
                Some(m.id.clone())
            } else {
                None
            }
        });

        match matching_pending {
            Some(temp_id) => {
                self.confirm(&temp_id, message);
                MergeOutcome::ConfirmedPending(temp_id)
            }
            None => {
                self.messages.push(message);
                self.resort();
                MergeOutcome::Appended
            }
        }
    }

    /// Optimistically edit an owned message
    pub fn apply_edit(&mut self, id: &str, new_content: &str) -> Result<()> {
        self.check_mutable(id)?;
        self.snapshot_if_absent(id)?;
        let message = self.find_owned_mut(id)?;
        message.content = new_content.to_string();
        message.is_edited = true;
        Ok(())
    }

    /// Optimistically retract an owned message (removed for everyone)
    pub fn apply_unsend(&mut self, id: &str) -> Result<()> {
        self.check_mutable(id)?;
        self.snapshot_if_absent(id)?;
        self.messages.retain(|m| m.id != id);
        Ok(())
    }

    /// Optimistically delete an owned message
    pub fn apply_delete_own(&mut self, id: &str) -> Result<()> {
        self.apply_unsend(id)
    }

    /// Confirm an optimistic message mutation
    pub fn confirm_mutation(&mut self, id: &str) {
        self.reverts.remove(id);
    }

    /// Revert an optimistic message mutation after transport failure
    pub fn revert_mutation(&mut self, id: &str) -> bool {
        match self.reverts.remove(id) {
            Some(snapshot) => {
                self.messages.retain(|m| m.id != id);
                self.messages.push(snapshot);
                self.resort();
                true
            }
            None => {
                warn!("revert requested for {} without a snapshot", id);
                false
            }
        }
    }

    /// Local tombstone for a message not owned by the current user
    ///
    /// The message is only hidden on this client; the remote thread keeps it.
    pub fn hide_for_me(&mut self, id: &str) -> Result<()> {
        let message = self
            .find(id)
            .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))?;
        if message.sender_id == self.user_id {
            return Err(SyncError::Validation(
                "own messages are deleted, not hidden".to_string(),
            ));
        }
        self.hidden.insert(id.to_string());
        Ok(())
    }

    /// Undo a tombstone (transport rejected the per-user archive)
    pub fn unhide(&mut self, id: &str) {
        self.hidden.remove(id);
    }

    /// Quoted content for a reply: live thread first, compose-time snapshot
    /// as the fallback for originals that are not fetched yet
    pub fn quoted_content(&self, message: &Message) -> Option<String> {
        let reply_to = message.reply_to.as_ref()?;
        self.find(&reply_to.id)
            .map(|original| original.content.clone())
            .or_else(|| reply_to.snapshot.clone())
    }

    /// A message can be mutated only once it is owned and confirmed; a
    /// still-delivering entry has no canonical id the server would accept
    fn check_mutable(&self, id: &str) -> Result<()> {
        let message = self
            .find(id)
            .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))?;
        if message.sender_id != self.user_id {
            return Err(SyncError::NotOwner(id.to_string()));
        }
        if message.is_pending() {
            return Err(SyncError::Conflict(format!(
                "{} is still being delivered",
                id
            )));
        }
        Ok(())
    }

    fn find_owned_mut(&mut self, id: &str) -> Result<&mut Message> {
        let user_id = self.user_id.clone();
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))?;
        if message.sender_id != user_id {
            return Err(SyncError::NotOwner(id.to_string()));
        }
        Ok(message)
    }

    fn snapshot_if_absent(&mut self, id: &str) -> Result<()> {
        if !self.reverts.contains_key(id) {
            let message = self
                .find(id)
                .cloned()
                .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))?;
            self.reverts.insert(id.to_string(), message);
        }
        Ok(())
    }

    fn resort(&mut self) {
        self.messages.sort_by(|a, b| a.thread_cmp(b));
    }
}
