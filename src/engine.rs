//! Sync engine
//!
//! Wires the stores, the dispatcher and the push channel together. The
//! engine owns the push loop: every server-originated event is routed to
//! the notification aggregator, the conversation store and — when the
//! affected conversation is the open one — the thread cache. State changes
//! are republished on the event bus for the UI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::dispatch::ActionDispatcher;
use crate::error::Result;
use crate::events::{EventBus, StoreEvent};
use crate::normalize;
use crate::store::{
    ConversationStore, CounterUpdate, LoadOutcome, NotificationAggregator, ThreadCache,
};
use crate::transport::{PushEvent, Transport};
use crate::types::{
    Attachment, Conversation, Folder, Message, NotificationCategory, ReplyTo,
};

/// Engine state snapshot for the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub online: bool,
    pub active_folder: Option<Folder>,
    pub open_conversation: Option<String>,
    pub pending_actions: usize,
    pub unread_total: u32,
}

/// The conversation and notification synchronization engine
pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    conversations: Arc<RwLock<ConversationStore>>,
    thread: Arc<RwLock<ThreadCache>>,
    notifications: Arc<RwLock<NotificationAggregator>>,
    dispatcher: ActionDispatcher,
    events: EventBus,
    online: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        user_id: impl Into<String>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let conversations = Arc::new(RwLock::new(ConversationStore::new(config.preview_length)));
        let thread = Arc::new(RwLock::new(ThreadCache::new(user_id)));
        let notifications = Arc::new(RwLock::new(NotificationAggregator::new()));
        let events = EventBus::new();

        let dispatcher = ActionDispatcher::new(
            transport.clone(),
            conversations.clone(),
            thread.clone(),
            events.clone(),
            config.clone(),
        );

        Arc::new(Self {
            transport,
            config,
            conversations,
            thread,
            notifications,
            dispatcher,
            events,
            online: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe to engine events; drop the receiver to unsubscribe
    pub fn subscribe(&self) -> flume::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Spawn the push loop in the background
    pub fn start(self: &Arc<Self>) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_push_loop().await;
        });
    }

    /// Stop the push loop after the next event
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Consume the push channel until shutdown
    pub async fn run_push_loop(&self) {
        let rx = self.transport.subscribe();
        info!("push loop started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match rx.recv_async().await {
                Ok(event) => self.handle_push(event).await,
                Err(_) => {
                    warn!("push channel closed");
                    break;
                }
            }
        }
        info!("push loop stopped");
    }

    /// Route one push event to the stores
    pub async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::Connect => {
                self.online.store(true, Ordering::SeqCst);
                self.events.emit(StoreEvent::ConnectionChanged { online: true });
                let needs_resync =
                    self.config.auto_resync || self.notifications.read().await.is_stale();
                if needs_resync {
                    if let Err(err) = self.resync_notifications().await {
                        warn!("counter resync after reconnect failed: {}", err);
                    }
                }
            }
            PushEvent::Disconnect => {
                self.online.store(false, Ordering::SeqCst);
                self.notifications.write().await.mark_stale();
                self.events.emit(StoreEvent::ConnectionChanged { online: false });
            }
            PushEvent::Notification { id, tag, payload } => {
                self.notifications
                    .write()
                    .await
                    .apply(CounterUpdate::Push { id, tag });
                self.events.emit(StoreEvent::CountersChanged);
                self.apply_push_payload(&payload).await;
            }
            PushEvent::NotificationUpdated { id, tag, payload } => {
                self.notifications
                    .write()
                    .await
                    .apply(CounterUpdate::Refresh { id, tag });
                self.apply_push_payload(&payload).await;
            }
            PushEvent::AllNotificationsRead => {
                self.notifications.write().await.apply(CounterUpdate::AllRead);
                self.events.emit(StoreEvent::CountersChanged);
            }
            PushEvent::NotificationDeleted { id } => {
                self.notifications
                    .write()
                    .await
                    .apply(CounterUpdate::Deleted { id });
                self.events.emit(StoreEvent::CountersChanged);
            }
        }
    }

    /// Merge the conversation/message parts of a push payload
    async fn apply_push_payload(&self, payload: &serde_json::Value) {
        let delta = normalize::normalize_push(payload);

        let mut thread_open = false;
        if let Some(message) = delta.message {
            let conversation_id = message.conversation_id.clone();
            let outcome = {
                let mut thread = self.thread.write().await;
                thread.merge_incoming(message, self.config.reconcile_window())
            };
            use crate::store::MergeOutcome;
            match outcome {
                MergeOutcome::Appended | MergeOutcome::ConfirmedPending(_) => {
                    thread_open = true;
                    self.events.emit(StoreEvent::ThreadChanged { conversation_id });
                }
                MergeOutcome::Duplicate => {
                    thread_open = true;
                }
                MergeOutcome::NotOpen => {}
            }
        }

        if let Some(conversation) = delta.conversation {
            let id = conversation.id.clone();
            let mut store = self.conversations.write().await;
            let outcome = store.upsert(conversation);
            if thread_open {
                // The user is looking at this thread; it never counts as unread
                store.mark_read(&id);
            }
            if outcome != crate::store::UpsertOutcome::Stale {
                if let Some(folder) = store.active_folder() {
                    drop(store);
                    self.events.emit(StoreEvent::ConversationsChanged { folder });
                }
            }
        }
    }

    /// Load a folder's conversations, replacing the current list
    ///
    /// Switching folders cancels the previous fetch; its response, should it
    /// still arrive, is discarded.
    pub async fn load_folder(&self, folder: Folder) -> Result<LoadOutcome> {
        let (epoch, cancel) = self.conversations.write().await.begin_load(folder);
        let payload = match self.transport.fetch_conversations(folder, &cancel).await {
            Ok(payload) => payload,
            Err(err) => {
                if cancel.is_cancelled() {
                    // The view moved on; the failure belongs to an abandoned fetch
                    return Ok(LoadOutcome::Stale);
                }
                return Err(err);
            }
        };
        let outcome = self
            .conversations
            .write()
            .await
            .complete_load(folder, epoch, &payload);
        if matches!(outcome, LoadOutcome::Applied(_)) {
            self.events.emit(StoreEvent::ConversationsChanged { folder });
        }
        Ok(outcome)
    }

    /// Open a conversation and fetch its full history
    pub async fn open_conversation(&self, id: &str) -> Result<LoadOutcome> {
        let (epoch, cancel) = self.thread.write().await.begin_open(id);
        let payload = match self.transport.fetch_thread(id, &cancel).await {
            Ok(payload) => payload,
            Err(err) => {
                if cancel.is_cancelled() {
                    return Ok(LoadOutcome::Stale);
                }
                return Err(err);
            }
        };
        let outcome = self.thread.write().await.complete_open(id, epoch, &payload);
        if matches!(outcome, LoadOutcome::Applied(_)) {
            // Opening the thread reads it
            let mut store = self.conversations.write().await;
            if store.mark_read(id) {
                if let Some(folder) = store.active_folder() {
                    drop(store);
                    self.events.emit(StoreEvent::ConversationsChanged { folder });
                }
            }
            self.events.emit(StoreEvent::ThreadChanged {
                conversation_id: id.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Close the open conversation
    pub async fn close_conversation(&self) {
        let closed = {
            let mut thread = self.thread.write().await;
            let open = thread.open_id().map(str::to_string);
            thread.close();
            open
        };
        if let Some(conversation_id) = closed {
            self.events.emit(StoreEvent::ThreadChanged { conversation_id });
        }
    }

    /// Re-fetch the authoritative counter snapshot and replace local state
    pub async fn resync_notifications(&self) -> Result<()> {
        let payload = self.transport.fetch_notification_summary().await?;
        let (counts, owners) = normalize::normalize_counter_snapshot(&payload);
        self.notifications
            .write()
            .await
            .apply(CounterUpdate::Snapshot { counts, owners });
        self.events.emit(StoreEvent::CountersChanged);
        Ok(())
    }

    /// Mark one notification as read (clamped at zero, idempotent per id)
    pub async fn mark_notification_read(&self, id: &str) {
        self.notifications
            .write()
            .await
            .apply(CounterUpdate::Read { id: id.to_string() });
        self.events.emit(StoreEvent::CountersChanged);
    }

    /// Mark a whole conversation as read locally
    pub async fn mark_conversation_read(&self, id: &str) {
        let changed = self.conversations.write().await.mark_read(id);
        if changed {
            if let Some(folder) = self.conversations.read().await.active_folder() {
                self.events.emit(StoreEvent::ConversationsChanged { folder });
            }
        }
        // Some backends key message notifications by conversation id
        self.notifications
            .write()
            .await
            .apply(CounterUpdate::Read { id: id.to_string() });
        self.events.emit(StoreEvent::CountersChanged);
    }

    /// Toggle the star on a conversation
    pub async fn star_conversation(&self, id: &str) -> Result<()> {
        self.dispatcher.star(id).await
    }

    /// Archive a conversation; closes the thread if it was the open one
    pub async fn archive_conversation(&self, id: &str) -> Result<()> {
        self.move_conversation(id, Folder::Archived).await
    }

    /// Move a conversation; closes the thread if it was the open one and
    /// the target folder is not the active view
    pub async fn move_conversation(&self, id: &str, target: Folder) -> Result<()> {
        let was_open = self.thread.read().await.is_open(id);
        let result = if target == Folder::Archived {
            self.dispatcher.archive(id).await
        } else {
            self.dispatcher.move_to(id, target).await
        };
        if result.is_ok() && was_open {
            let active = self.conversations.read().await.active_folder();
            if active != Some(target) {
                self.close_conversation().await;
            }
        }
        result
    }

    /// Delete a conversation; closes the thread if it was the open one
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let was_open = self.thread.read().await.is_open(id);
        let result = self.dispatcher.delete(id).await;
        if result.is_ok() && was_open {
            self.close_conversation().await;
        }
        result
    }

    /// Send a message into a conversation
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<ReplyTo>,
    ) -> Result<Message> {
        self.dispatcher
            .send(conversation_id, content, attachments, reply_to)
            .await
    }

    /// Edit an owned message
    pub async fn edit_message(&self, id: &str, content: &str) -> Result<()> {
        self.dispatcher.edit_message(id, content).await
    }

    /// Retract an owned message for everyone
    pub async fn unsend_message(&self, id: &str) -> Result<()> {
        self.dispatcher.unsend_message(id).await
    }

    /// Delete an owned message
    pub async fn delete_message(&self, id: &str) -> Result<()> {
        self.dispatcher.delete_message(id).await
    }

    /// Hide a foreign message on this client only
    pub async fn hide_message(&self, id: &str) -> Result<()> {
        self.dispatcher.hide_message(id).await
    }

    /// Conversations of the active folder, in display order
    pub async fn visible_conversations(&self) -> Vec<Conversation> {
        self.conversations.read().await.visible().to_vec()
    }

    /// Conversations of one folder, in display order
    pub async fn folder_conversations(&self, folder: Folder) -> Vec<Conversation> {
        self.conversations.read().await.list(folder).to_vec()
    }

    /// Visible messages of the open thread
    pub async fn visible_thread(&self) -> Vec<Message> {
        self.thread
            .read()
            .await
            .visible_messages()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Current counter values, every category present
    pub async fn counters(&self) -> HashMap<NotificationCategory, u32> {
        self.notifications.read().await.counts()
    }

    /// Engine state snapshot
    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            online: self.online.load(Ordering::SeqCst),
            active_folder: self.conversations.read().await.active_folder(),
            open_conversation: self.thread.read().await.open_id().map(str::to_string),
            pending_actions: self.dispatcher.pending_count(),
            unread_total: self.notifications.read().await.total(),
        }
    }
}
