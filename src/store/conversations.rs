//! Conversation store
//!
//! Canonical per-folder conversation lists. Three producers write here:
//! folder fetches (replace a whole list), push upserts (merge one record)
//! and optimistic user actions (mutate, then confirm or roll back). Fetch
//! completions are guarded by an epoch so a response for a folder the user
//! already left is discarded instead of regressing the view.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::normalize;
use crate::transport::CancelToken;
use crate::types::{Conversation, ConversationDelta, Folder};

/// Outcome of a completed folder fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The response was applied; carries the number of conversations
    Applied(usize),
    /// The response arrived after the view moved on and was discarded
    Stale,
}

/// Outcome of merging a push delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new conversation record was created
    Created,
    /// An existing record was updated in place
    Updated,
    /// The record moved to a different folder
    Relocated { from: Folder, to: Folder },
    /// The delta was older than the stored state and was dropped
    Stale,
}

/// Per-folder conversation lists with optimistic mutation support
pub struct ConversationStore {
    lists: HashMap<Folder, Vec<Conversation>>,
    active_folder: Option<Folder>,
    epoch: u64,
    inflight_cancel: Option<CancelToken>,
    /// Last confirmed state per id, kept while a mutation is unconfirmed
    snapshots: HashMap<String, Conversation>,
    preview_length: usize,
}

impl ConversationStore {
    pub fn new(preview_length: usize) -> Self {
        Self {
            lists: HashMap::new(),
            active_folder: None,
            epoch: 0,
            inflight_cancel: None,
            snapshots: HashMap::new(),
            preview_length,
        }
    }

    /// Begin loading a folder
    ///
    /// Cancels any fetch still in flight for a previous view and returns the
    /// epoch + cancel token to pass to the transport. Only a completion
    /// carrying the returned epoch will be applied.
    pub fn begin_load(&mut self, folder: Folder) -> (u64, CancelToken) {
        if let Some(cancel) = self.inflight_cancel.take() {
            cancel.cancel();
        }
        self.epoch += 1;
        self.active_folder = Some(folder);
        let token = CancelToken::new();
        self.inflight_cancel = Some(token.clone());
        (self.epoch, token)
    }

    /// Apply a completed folder fetch
    ///
    /// Returns [`LoadOutcome::Stale`] without touching any state when the
    /// epoch no longer matches the active view.
    pub fn complete_load(&mut self, folder: Folder, epoch: u64, payload: &Value) -> LoadOutcome {
        if epoch != self.epoch || self.active_folder != Some(folder) {
            debug!(
                "discarding stale folder response for {} (epoch {} != {})",
                folder.as_str(),
                epoch,
                self.epoch
            );
            return LoadOutcome::Stale;
        }
        self.inflight_cancel = None;

        let mut conversations = normalize::normalize_conversations(folder, payload);
        for conversation in &mut conversations {
            self.truncate_preview(conversation);
            // A fetched record is the confirmed state; forget any stale
            // optimistic snapshot for it
            self.snapshots.remove(&conversation.id);
            self.remove_everywhere(&conversation.id);
        }

        let count = conversations.len();
        self.lists.insert(folder, conversations);
        self.sort_folder(folder);
        LoadOutcome::Applied(count)
    }

    /// The folder currently displayed
    pub fn active_folder(&self) -> Option<Folder> {
        self.active_folder
    }

    /// Conversations of the active folder, in display order
    pub fn visible(&self) -> &[Conversation] {
        self.active_folder
            .map(|folder| self.list(folder))
            .unwrap_or(&[])
    }

    /// Conversations of one folder, in display order
    pub fn list(&self, folder: Folder) -> &[Conversation] {
        self.lists.get(&folder).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find a conversation anywhere in the store
    pub fn find(&self, id: &str) -> Option<&Conversation> {
        self.lists.values().flatten().find(|c| c.id == id)
    }

    /// Folder currently holding the given conversation
    pub fn folder_of(&self, id: &str) -> Option<Folder> {
        self.find(id).map(|c| c.folder)
    }

    /// Merge a push-derived delta into the store
    ///
    /// A delta whose last-message timestamp is older than the stored one is
    /// dropped (newer timestamp always wins over a stale arrival).
    pub fn upsert(&mut self, delta: ConversationDelta) -> UpsertOutcome {
        match self.take(&delta.id) {
            Some((current_folder, mut conversation)) => {
                let incoming_ts = delta.last_message.as_ref().map(|m| m.timestamp);
                let stored_ts = conversation.last_activity();
                if let (Some(incoming), Some(stored)) = (incoming_ts, stored_ts) {
                    if incoming < stored {
                        debug!(
                            "dropping stale push delta for conversation {} ({} < {})",
                            delta.id, incoming, stored
                        );
                        self.insert(conversation);
                        return UpsertOutcome::Stale;
                    }
                }

                if let Some(counterpart_id) = delta.counterpart_id {
                    conversation.counterpart_id = counterpart_id;
                }
                if let Some(last_message) = delta.last_message {
                    if !last_message.is_read && !conversation_last_matches(&conversation, &last_message.timestamp) {
                        conversation.unread_count = conversation.unread_count.saturating_add(1);
                    }
                    conversation.last_message = Some(last_message);
                }
                if let Some(unread_count) = delta.unread_count {
                    conversation.unread_count = unread_count;
                }
                if let Some(is_starred) = delta.is_starred {
                    conversation.is_starred = is_starred;
                }
                if let Some(is_pinned) = delta.is_pinned {
                    conversation.is_pinned = is_pinned;
                }
                if let Some(ad) = delta.ad {
                    conversation.ad = Some(ad);
                }
                let target = delta.folder.unwrap_or(current_folder);
                conversation.folder = target;
                self.truncate_preview(&mut conversation);
                self.insert(conversation);

                if target != current_folder {
                    UpsertOutcome::Relocated {
                        from: current_folder,
                        to: target,
                    }
                } else {
                    UpsertOutcome::Updated
                }
            }
            None => {
                // First sighting of this counterpart/ad pair
                let folder = delta.folder.unwrap_or(Folder::Inbox);
                let unread = delta.unread_count.unwrap_or(
                    delta
                        .last_message
                        .as_ref()
                        .map(|m| if m.is_read { 0 } else { 1 })
                        .unwrap_or(0),
                );
                let mut conversation = Conversation {
                    id: delta.id,
                    counterpart_id: delta.counterpart_id.unwrap_or_default(),
                    folder,
                    last_message: delta.last_message,
                    unread_count: unread,
                    is_starred: delta.is_starred.unwrap_or(false),
                    is_pinned: delta.is_pinned.unwrap_or(false),
                    ad: delta.ad,
                };
                self.truncate_preview(&mut conversation);
                self.insert(conversation);
                UpsertOutcome::Created
            }
        }
    }

    /// Optimistically toggle the star; returns the new state
    pub fn apply_star(&mut self, id: &str) -> Result<bool> {
        self.snapshot_if_absent(id)?;
        let (folder, mut conversation) = self
            .take(id)
            .ok_or_else(|| SyncError::ConversationNotFound(id.to_string()))?;
        conversation.is_starred = !conversation.is_starred;
        let starred = conversation.is_starred;
        // Starring does not relocate; the starred folder is a filtered view
        // refreshed by its own fetch
        conversation.folder = folder;
        self.insert(conversation);
        Ok(starred)
    }

    /// Optimistically move a conversation to another folder
    pub fn apply_move(&mut self, id: &str, target: Folder) -> Result<()> {
        self.snapshot_if_absent(id)?;
        let (_, mut conversation) = self
            .take(id)
            .ok_or_else(|| SyncError::ConversationNotFound(id.to_string()))?;
        conversation.folder = target;
        self.insert(conversation);
        Ok(())
    }

    /// Optimistically archive (move to the archive folder)
    pub fn apply_archive(&mut self, id: &str) -> Result<()> {
        self.apply_move(id, Folder::Archived)
    }

    /// Optimistically delete; the snapshot keeps the record for rollback
    pub fn apply_delete(&mut self, id: &str) -> Result<()> {
        self.snapshot_if_absent(id)?;
        if self.take(id).is_none() {
            return Err(SyncError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Clear the unread count after the user read the conversation
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.take(id) {
            Some((_, mut conversation)) => {
                conversation.unread_count = 0;
                if let Some(last) = conversation.last_message.as_mut() {
                    last.is_read = true;
                }
                self.insert(conversation);
                true
            }
            None => false,
        }
    }

    /// Confirm an optimistic mutation: the current state becomes canonical
    pub fn confirm(&mut self, id: &str) {
        self.snapshots.remove(id);
    }

    /// Roll back to the last confirmed state
    pub fn rollback(&mut self, id: &str) -> bool {
        match self.snapshots.remove(id) {
            Some(snapshot) => {
                self.remove_everywhere(id);
                self.insert(snapshot);
                true
            }
            None => {
                warn!("rollback requested for {} without a snapshot", id);
                false
            }
        }
    }

    fn snapshot_if_absent(&mut self, id: &str) -> Result<()> {
        if !self.snapshots.contains_key(id) {
            let conversation = self
                .find(id)
                .cloned()
                .ok_or_else(|| SyncError::ConversationNotFound(id.to_string()))?;
            self.snapshots.insert(id.to_string(), conversation);
        }
        Ok(())
    }

    /// Remove and return the record, wherever it currently lives
    fn take(&mut self, id: &str) -> Option<(Folder, Conversation)> {
        for (folder, list) in self.lists.iter_mut() {
            if let Some(pos) = list.iter().position(|c| c.id == id) {
                return Some((*folder, list.remove(pos)));
            }
        }
        None
    }

    fn remove_everywhere(&mut self, id: &str) {
        for list in self.lists.values_mut() {
            list.retain(|c| c.id != id);
        }
    }

    /// Insert into the list of the record's own folder, keeping order.
    /// A conversation id lives in exactly one list at a time.
    fn insert(&mut self, conversation: Conversation) {
        self.remove_everywhere(&conversation.id);
        let folder = conversation.folder;
        self.lists.entry(folder).or_default().push(conversation);
        self.sort_folder(folder);
    }

    fn sort_folder(&mut self, folder: Folder) {
        if let Some(list) = self.lists.get_mut(&folder) {
            list.sort_by(display_order);
        }
    }

    fn truncate_preview(&self, conversation: &mut Conversation) {
        if let Some(last) = conversation.last_message.as_mut() {
            if last.content.chars().count() > self.preview_length {
                last.content = last.content.chars().take(self.preview_length).collect();
            }
        }
    }
}

fn conversation_last_matches(
    conversation: &Conversation,
    timestamp: &chrono::DateTime<chrono::Utc>,
) -> bool {
    conversation
        .last_message
        .as_ref()
        .map(|m| m.timestamp == *timestamp)
        .unwrap_or(false)
}

/// Display order: pinned first, then unread, then newest activity, id as
/// the final tie-break
fn display_order(a: &Conversation, b: &Conversation) -> Ordering {
    b.is_pinned
        .cmp(&a.is_pinned)
        .then_with(|| b.has_unread().cmp(&a.has_unread()))
        .then_with(|| b.last_activity().cmp(&a.last_activity()))
        .then_with(|| a.id.cmp(&b.id))
}
