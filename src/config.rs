//! Sync engine configuration

use serde::{Deserialize, Serialize};

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Window for matching a pushed message against a pending optimistic
    /// send (seconds). The transport gives us no correlation id, so
    /// reconciliation is heuristic: same sender, same content, arrival
    /// within this window.
    pub reconcile_window_secs: u64,
    /// Maximum length of the last-message preview shown in folder lists
    pub preview_length: usize,
    /// Re-fetch the notification snapshot automatically on reconnect
    pub auto_resync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_window_secs: 5,
            preview_length: 100,
            auto_resync: true,
        }
    }
}

impl SyncConfig {
    /// Reconcile window as a chrono duration
    pub fn reconcile_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_window_secs as i64)
    }
}
