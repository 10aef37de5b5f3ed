//! Action dispatcher
//!
//! Serializes user-triggered mutations per target entity id so rapid
//! repeated interaction (double-click star) cannot interleave partially
//! applied states. Every action follows the same cycle: optimistic apply,
//! transport call, confirm on success, rollback on failure. Apply, confirm
//! and rollback all run while the entity's in-flight slot is occupied, so
//! no two actions for one id ever observe each other's intermediate state.
//!
//! The serialization is an explicit in-flight map keyed by entity id —
//! multiple entities mutate concurrently, so single-threadedness alone is
//! not enough. Sends are serialized per conversation as well, but queue
//! FIFO instead of superseding: dropping a queued send would lose a
//! message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, StoreEvent};
use crate::normalize;
use crate::store::{ConversationStore, ThreadCache};
use crate::transport::{SendRequest, Transport};
use crate::types::{Attachment, Folder, Message, ReplyTo};

/// Maximum number of attachments per message
pub const MAX_ATTACHMENTS: usize = 5;
/// Maximum size of a single attachment
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;
/// Mime types accepted for upload
pub const ALLOWED_MIME_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
];

/// One serialized transport mutation, keyed by its entity id
#[derive(Debug, Clone, PartialEq, Eq)]
enum TransportCall {
    StarConversation,
    ArchiveConversation,
    MoveConversation(Folder),
    DeleteConversation,
    EditMessage(String),
    UnsendMessage,
    DeleteMessage,
    ArchiveMessage,
}

impl TransportCall {
    fn is_conversation(&self) -> bool {
        matches!(
            self,
            Self::StarConversation
                | Self::ArchiveConversation
                | Self::MoveConversation(_)
                | Self::DeleteConversation
        )
    }
}

#[derive(Default)]
struct InflightSlot {
    /// Newest superseding request; replaced by later ones (last wins)
    next: Option<TransportCall>,
}

/// Optimistic-apply / confirm / rollback driver for all user actions
pub struct ActionDispatcher {
    transport: Arc<dyn Transport>,
    conversations: Arc<RwLock<ConversationStore>>,
    thread: Arc<RwLock<ThreadCache>>,
    inflight: Mutex<HashMap<String, InflightSlot>>,
    /// Per-conversation send queues; FIFO, never superseded
    send_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events: EventBus,
    config: SyncConfig,
}

impl ActionDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        conversations: Arc<RwLock<ConversationStore>>,
        thread: Arc<RwLock<ThreadCache>>,
        events: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            conversations,
            thread,
            inflight: Mutex::new(HashMap::new()),
            send_locks: Mutex::new(HashMap::new()),
            events,
            config,
        }
    }

    /// Entities with an unconfirmed mutation or an in-flight send
    pub fn pending_count(&self) -> usize {
        self.inflight.lock().expect("inflight map poisoned").len()
            + self.send_locks.lock().expect("send lock map poisoned").len()
    }

    /// Toggle the star on a conversation
    pub async fn star(&self, id: &str) -> Result<()> {
        self.run_serialized(id, TransportCall::StarConversation).await
    }

    /// Archive a conversation
    pub async fn archive(&self, id: &str) -> Result<()> {
        self.run_serialized(id, TransportCall::ArchiveConversation).await
    }

    /// Move a conversation to another folder
    pub async fn move_to(&self, id: &str, target: Folder) -> Result<()> {
        self.run_serialized(id, TransportCall::MoveConversation(target))
            .await
    }

    /// Delete a conversation
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.run_serialized(id, TransportCall::DeleteConversation).await
    }

    /// Edit an owned message
    pub async fn edit_message(&self, id: &str, new_content: &str) -> Result<()> {
        self.run_serialized(id, TransportCall::EditMessage(new_content.to_string()))
            .await
    }

    /// Retract an owned message for everyone
    pub async fn unsend_message(&self, id: &str) -> Result<()> {
        self.run_serialized(id, TransportCall::UnsendMessage).await
    }

    /// Delete an owned message
    pub async fn delete_message(&self, id: &str) -> Result<()> {
        self.run_serialized(id, TransportCall::DeleteMessage).await
    }

    /// Hide a foreign message on this client only
    pub async fn hide_message(&self, id: &str) -> Result<()> {
        self.run_serialized(id, TransportCall::ArchiveMessage).await
    }

    /// Send a message into a conversation
    ///
    /// Validation happens before any transport call; an invalid request
    /// performs zero network activity. Concurrent sends to the same
    /// conversation queue behind each other in request order.
    pub async fn send(
        &self,
        conversation_id: &str,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<ReplyTo>,
    ) -> Result<Message> {
        validate_send(&content, &attachments)?;

        let lock = {
            let mut locks = self.send_locks.lock().expect("send lock map poisoned");
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock().await;
        let result = self
            .send_serialized(conversation_id, content, attachments, reply_to)
            .await;
        drop(guard);
        drop(lock);
        self.release_send_lock(conversation_id);
        result
    }

    async fn send_serialized(
        &self,
        conversation_id: &str,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<ReplyTo>,
    ) -> Result<Message> {
        // Capture the quoted content now so an optimistic reply composed
        // before the original is fetched still renders
        let reply_to = {
            let thread = self.thread.read().await;
            reply_to.map(|mut r| {
                if r.snapshot.is_none() {
                    r.snapshot = thread.find(&r.id).map(|m| m.content.clone());
                }
                r
            })
        };

        // Optimistic entry, visible before confirmation
        let temp = {
            let mut thread = self.thread.write().await;
            if thread.is_open(conversation_id) {
                Some(thread.append_optimistic(
                    content.clone(),
                    attachments.clone(),
                    reply_to.clone(),
                )?)
            } else {
                None
            }
        };
        if temp.is_some() {
            self.emit_thread_changed().await;
        }

        let request = SendRequest {
            conversation_id: conversation_id.to_string(),
            content,
            attachments,
            reply_to,
        };

        match self.transport.send_message(request).await {
            Ok(raw) => {
                let canonical = match normalize::normalize_message(&raw) {
                    Some(message) => message,
                    None => {
                        // Confirmation we cannot interpret: treat as failure
                        if let Some(temp) = &temp {
                            self.thread.write().await.remove(&temp.id);
                            self.emit_thread_changed().await;
                        }
                        return Err(SyncError::Parse(
                            "send confirmation without message id".to_string(),
                        ));
                    }
                };
                if let Some(temp) = &temp {
                    self.thread.write().await.confirm(&temp.id, canonical.clone());
                    self.emit_thread_changed().await;
                }
                Ok(canonical)
            }
            Err(err) => {
                // Never leave the optimistic entry behind
                if let Some(temp) = &temp {
                    self.thread.write().await.remove(&temp.id);
                    self.emit_thread_changed().await;
                }
                warn!("send to {} failed: {}", conversation_id, err);
                self.events.emit(StoreEvent::Notice {
                    message: format!("Message could not be sent: {}", err),
                });
                Err(err)
            }
        }
    }

    fn release_send_lock(&self, conversation_id: &str) {
        let mut locks = self.send_locks.lock().expect("send lock map poisoned");
        if let Some(lock) = locks.get(conversation_id) {
            // Only the map itself holds the lock once every sender is done
            if Arc::strong_count(lock) == 1 {
                locks.remove(conversation_id);
            }
        }
    }

    /// Execute a transport call with per-entity serialization
    ///
    /// If a call for the same id is already in flight the new one is parked
    /// as its successor (last-requested-wins) and this invocation returns
    /// immediately; the slot owner applies and executes it once the current
    /// call resolves. A successor parked behind a call that fails is
    /// dropped with the chain — it was requested against state that no
    /// longer exists.
    async fn run_serialized(&self, id: &str, call: TransportCall) -> Result<()> {
        let mut current = {
            let mut inflight = self.inflight.lock().expect("inflight map poisoned");
            if let Some(slot) = inflight.get_mut(id) {
                info!("superseding queued action for {}", id);
                slot.next = Some(call);
                return Ok(());
            }
            inflight.insert(id.to_string(), InflightSlot::default());
            call
        };

        loop {
            if let Err(err) = self.apply(id, &current).await {
                self.inflight
                    .lock()
                    .expect("inflight map poisoned")
                    .remove(id);
                return Err(err);
            }

            if let Err(err) = self.execute(id, &current).await {
                // Revert while still occupying the slot so no new action
                // for this id can base itself on the unreverted state; any
                // successor parked meanwhile was never applied
                self.rollback(id, &current).await;
                self.inflight
                    .lock()
                    .expect("inflight map poisoned")
                    .remove(id);
                if matches!(err, SyncError::Auth(_)) {
                    self.events.emit(StoreEvent::AuthRequired);
                } else {
                    self.events.emit(StoreEvent::Notice {
                        message: format!("Action failed: {}", err),
                    });
                }
                return Err(err);
            }

            // Commit before releasing the slot, then pick up a successor
            // that arrived during the transport call or the commit
            self.confirm(id, &current).await;
            let next = {
                let mut inflight = self.inflight.lock().expect("inflight map poisoned");
                match inflight.get_mut(id).and_then(|slot| slot.next.take()) {
                    Some(next) => Some(next),
                    None => {
                        inflight.remove(id);
                        None
                    }
                }
            };
            match next {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    /// Optimistic local mutation for one call, visible before confirmation
    async fn apply(&self, id: &str, call: &TransportCall) -> Result<()> {
        match call {
            TransportCall::StarConversation => {
                self.conversations.write().await.apply_star(id)?;
            }
            TransportCall::ArchiveConversation => {
                self.conversations.write().await.apply_archive(id)?;
            }
            TransportCall::MoveConversation(folder) => {
                self.conversations.write().await.apply_move(id, *folder)?;
            }
            TransportCall::DeleteConversation => {
                self.conversations.write().await.apply_delete(id)?;
            }
            TransportCall::EditMessage(content) => {
                self.thread.write().await.apply_edit(id, content)?;
            }
            TransportCall::UnsendMessage => {
                self.thread.write().await.apply_unsend(id)?;
            }
            TransportCall::DeleteMessage => {
                self.thread.write().await.apply_delete_own(id)?;
            }
            TransportCall::ArchiveMessage => {
                self.thread.write().await.hide_for_me(id)?;
            }
        }
        if call.is_conversation() {
            self.emit_conversations_changed().await;
        } else {
            self.emit_thread_changed().await;
        }
        Ok(())
    }

    async fn execute(&self, id: &str, call: &TransportCall) -> Result<()> {
        match call {
            TransportCall::StarConversation => self.transport.star_conversation(id).await,
            TransportCall::ArchiveConversation => self.transport.archive_conversation(id).await,
            TransportCall::MoveConversation(folder) => {
                self.transport.move_conversation(id, *folder).await
            }
            TransportCall::DeleteConversation => self.transport.delete_conversation(id).await,
            TransportCall::EditMessage(content) => {
                self.transport.edit_message(id, content).await.map(|_| ())
            }
            TransportCall::UnsendMessage => self.transport.unsend_message(id).await,
            TransportCall::DeleteMessage => self.transport.delete_message(id).await,
            TransportCall::ArchiveMessage => self.transport.archive_message(id).await,
        }
    }

    async fn confirm(&self, id: &str, call: &TransportCall) {
        if call.is_conversation() {
            self.conversations.write().await.confirm(id);
        } else if *call == TransportCall::ArchiveMessage {
            // Tombstone stays; nothing to confirm
        } else {
            self.thread.write().await.confirm_mutation(id);
        }
    }

    async fn rollback(&self, id: &str, call: &TransportCall) {
        if call.is_conversation() {
            self.conversations.write().await.rollback(id);
            self.emit_conversations_changed().await;
        } else if *call == TransportCall::ArchiveMessage {
            self.thread.write().await.unhide(id);
            self.emit_thread_changed().await;
        } else {
            self.thread.write().await.revert_mutation(id);
            self.emit_thread_changed().await;
        }
    }

    async fn emit_conversations_changed(&self) {
        if let Some(folder) = self.conversations.read().await.active_folder() {
            self.events.emit(StoreEvent::ConversationsChanged { folder });
        }
    }

    async fn emit_thread_changed(&self) {
        if let Some(id) = self.thread.read().await.open_id() {
            self.events.emit(StoreEvent::ThreadChanged {
                conversation_id: id.to_string(),
            });
        }
    }

    /// Reconcile window used when matching pushed messages (exposed for the
    /// engine's push handling)
    pub fn reconcile_window(&self) -> chrono::Duration {
        self.config.reconcile_window()
    }
}

/// Validate a send request before any network call
pub fn validate_send(content: &str, attachments: &[Attachment]) -> Result<()> {
    if content.trim().is_empty() && attachments.is_empty() {
        return Err(SyncError::Validation(
            "message needs content or at least one attachment".to_string(),
        ));
    }
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(SyncError::Validation(format!(
            "too many attachments ({} > {})",
            attachments.len(),
            MAX_ATTACHMENTS
        )));
    }
    for attachment in attachments {
        if attachment.size_bytes > MAX_ATTACHMENT_BYTES {
            return Err(SyncError::Validation(format!(
                "attachment {} exceeds {} bytes",
                attachment.name, MAX_ATTACHMENT_BYTES
            )));
        }
        if !ALLOWED_MIME_TYPES.contains(&attachment.mime_type.as_str()) {
            return Err(SyncError::Validation(format!(
                "unsupported attachment type: {}",
                attachment.mime_type
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{init_test_logging, MockTransport};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn attachment(mime: &str, size: u64) -> Attachment {
        Attachment {
            id: "a1".to_string(),
            name: "plik".to_string(),
            url: String::new(),
            mime_type: mime.to_string(),
            size_bytes: size,
        }
    }

    #[test]
    fn test_empty_send_rejected() {
        assert!(matches!(
            validate_send("   ", &[]),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_attachment_only_send_allowed() {
        assert!(validate_send("", &[attachment("image/png", 10)]).is_ok());
    }

    #[test]
    fn test_attachment_count_limit() {
        let many: Vec<Attachment> = (0..6).map(|_| attachment("image/png", 10)).collect();
        assert!(matches!(
            validate_send("hej", &many),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_attachment_size_limit() {
        let big = attachment("application/pdf", MAX_ATTACHMENT_BYTES + 1);
        assert!(matches!(
            validate_send("hej", &[big]),
            Err(SyncError::Validation(_))
        ));
        let ok = attachment("application/pdf", MAX_ATTACHMENT_BYTES);
        assert!(validate_send("hej", &[ok]).is_ok());
    }

    #[test]
    fn test_mime_allow_list() {
        assert!(matches!(
            validate_send("hej", &[attachment("application/zip", 10)]),
            Err(SyncError::Validation(_))
        ));
        for mime in ALLOWED_MIME_TYPES {
            assert!(validate_send("hej", &[attachment(mime, 10)]).is_ok());
        }
    }

    async fn seeded() -> (
        Arc<ActionDispatcher>,
        Arc<MockTransport>,
        Arc<RwLock<ConversationStore>>,
    ) {
        init_test_logging();
        let mock = Arc::new(MockTransport::new());
        let conversations = Arc::new(RwLock::new(ConversationStore::new(100)));
        let dispatcher = Arc::new(ActionDispatcher::new(
            mock.clone(),
            conversations.clone(),
            Arc::new(RwLock::new(ThreadCache::new("me"))),
            EventBus::new(),
            SyncConfig::default(),
        ));
        let (epoch, _) = conversations.write().await.begin_load(Folder::Inbox);
        conversations.write().await.complete_load(
            Folder::Inbox,
            epoch,
            &json!([{"id": "c1", "counterpartId": "u1", "lastMessage":
                {"content": "hej", "timestamp": 100, "isRead": true}}]),
        );
        (dispatcher, mock, conversations)
    }

    #[tokio::test]
    async fn test_rapid_star_requests_supersede_without_interleaving() {
        let (dispatcher, mock, conversations) = seeded().await;

        mock.gate("star_conversation");
        let owner = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.star("c1").await })
        };
        while mock.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.pending_count(), 1);

        // Second and third requests park behind the first; the third
        // supersedes the second, which never executes
        dispatcher.star("c1").await.unwrap();
        dispatcher.star("c1").await.unwrap();

        mock.open_gate("star_conversation");
        timeout(Duration::from_secs(5), owner)
            .await
            .expect("first star timed out")
            .expect("first star panicked")
            .unwrap();

        assert_eq!(mock.calls().len(), 2);
        // Two executed toggles land back on unstarred, nothing half-applied
        assert!(!conversations.read().await.find("c1").unwrap().is_starred);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_successor_rolls_back_onto_confirmed_predecessor() {
        let (dispatcher, mock, conversations) = seeded().await;

        mock.gate("archive_conversation");
        mock.fail("star_conversation");
        let owner = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.archive("c1").await })
        };
        while mock.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        // Parks behind the in-flight archive
        dispatcher.star("c1").await.unwrap();

        mock.open_gate("archive_conversation");
        let result = timeout(Duration::from_secs(5), owner)
            .await
            .expect("archive chain timed out")
            .expect("archive chain panicked");
        assert!(matches!(result, Err(SyncError::Network(_))));

        // The confirmed archive survives; the failed star is fully reverted
        let store = conversations.read().await;
        assert_eq!(store.folder_of("c1"), Some(Folder::Archived));
        assert!(!store.find("c1").unwrap().is_starred);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_sends_to_one_conversation_queue_fifo() {
        let (dispatcher, mock, _conversations) = seeded().await;

        mock.gate("send_message");
        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .send("c1", "pierwsza".to_string(), vec![], None)
                    .await
            })
        };
        while mock.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.pending_count(), 1);

        let second = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .send("c1", "druga".to_string(), vec![], None)
                    .await
            })
        };
        // The queued send must not reach the transport while the first is
        // in flight
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(mock.calls().len(), 1);

        mock.open_gate("send_message");
        let first = timeout(Duration::from_secs(5), first)
            .await
            .expect("first send timed out")
            .expect("first send panicked")
            .unwrap();
        let second = timeout(Duration::from_secs(5), second)
            .await
            .expect("second send timed out")
            .expect("second send panicked")
            .unwrap();

        // Both delivered, in request order, none dropped
        assert_eq!(mock.calls().len(), 2);
        assert_eq!(first.content, "pierwsza");
        assert_eq!(second.content, "druga");
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
