//! Scripted transport for tests
//!
//! Records every REST call, serves canned payloads per folder/conversation
//! and injects failures per operation. Operations can be gated to hold a
//! call in flight while the test drives concurrent requests. Push events
//! are fed through the same channel a real transport would use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::error::{Result, SyncError};
use crate::types::Folder;

use super::{CancelToken, PushEvent, SendRequest, Transport};

/// Route engine tracing through the test harness; safe to call repeatedly
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct MockTransport {
    pub conversations: Mutex<HashMap<Folder, Value>>,
    pub threads: Mutex<HashMap<String, Value>>,
    pub summary: Mutex<Value>,
    /// Canned send confirmation; when unset, one is derived from the request
    pub send_response: Mutex<Option<Value>>,
    failures: Mutex<HashMap<String, SyncError>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
    push_tx: flume::Sender<PushEvent>,
    push_rx: flume::Receiver<PushEvent>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (push_tx, push_rx) = flume::unbounded();
        Self {
            conversations: Mutex::new(HashMap::new()),
            threads: Mutex::new(HashMap::new()),
            summary: Mutex::new(json!({})),
            send_response: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            push_tx,
            push_rx,
        }
    }

    /// Make the named operation fail with a network error
    pub fn fail(&self, op: &str) {
        self.fail_with(op, SyncError::Network(format!("{} unavailable", op)));
    }

    /// Make the named operation fail with a specific error
    pub fn fail_with(&self, op: &str, err: SyncError) {
        self.failures.lock().unwrap().insert(op.to_string(), err);
    }

    /// Clear an injected failure
    pub fn recover(&self, op: &str) {
        self.failures.lock().unwrap().remove(op);
    }

    /// Hold every call of the named operation in flight until
    /// [`MockTransport::open_gate`]; the call is recorded before blocking
    pub fn gate(&self, op: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(op.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Release all blocked and future callers of a gated operation
    pub fn open_gate(&self, op: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(op) {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    /// Names of all REST calls made so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Emit a push event to subscribers
    pub fn push(&self, event: PushEvent) {
        self.push_tx.send(event).expect("push channel closed");
    }

    async fn call(&self, op: &str) -> Result<()> {
        self.calls.lock().unwrap().push(op.to_string());
        let failure = self.failures.lock().unwrap().get(op).cloned();
        if let Some(err) = failure {
            return Err(err);
        }
        let gate = self.gates.lock().unwrap().get(op).cloned();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_conversations(&self, folder: Folder, _cancel: &CancelToken) -> Result<Value> {
        self.call("fetch_conversations").await?;
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(&folder)
            .cloned()
            .unwrap_or_else(|| json!([])))
    }

    async fn fetch_thread(&self, conversation_id: &str, _cancel: &CancelToken) -> Result<Value> {
        self.call("fetch_thread").await?;
        Ok(self
            .threads
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| json!([])))
    }

    async fn fetch_notification_summary(&self) -> Result<Value> {
        self.call("fetch_notification_summary").await?;
        Ok(self.summary.lock().unwrap().clone())
    }

    async fn send_message(&self, request: SendRequest) -> Result<Value> {
        self.call("send_message").await?;
        if let Some(canned) = self.send_response.lock().unwrap().take() {
            return Ok(canned);
        }
        Ok(json!({
            "id": format!("srv-{}", uuid::Uuid::new_v4()),
            "conversationId": request.conversation_id,
            "senderId": "me",
            "content": request.content,
            "createdAt": Utc::now().to_rfc3339(),
            "isRead": true,
        }))
    }

    async fn edit_message(&self, id: &str, content: &str) -> Result<Value> {
        self.call("edit_message").await?;
        Ok(json!({"id": id, "content": content, "isEdited": true}))
    }

    async fn delete_message(&self, _id: &str) -> Result<()> {
        self.call("delete_message").await
    }

    async fn archive_message(&self, _id: &str) -> Result<()> {
        self.call("archive_message").await
    }

    async fn unsend_message(&self, _id: &str) -> Result<()> {
        self.call("unsend_message").await
    }

    async fn star_conversation(&self, _id: &str) -> Result<()> {
        self.call("star_conversation").await
    }

    async fn archive_conversation(&self, _id: &str) -> Result<()> {
        self.call("archive_conversation").await
    }

    async fn move_conversation(&self, _id: &str, _folder: Folder) -> Result<()> {
        self.call("move_conversation").await
    }

    async fn delete_conversation(&self, _id: &str) -> Result<()> {
        self.call("delete_conversation").await
    }

    fn subscribe(&self) -> flume::Receiver<PushEvent> {
        self.push_rx.clone()
    }
}
