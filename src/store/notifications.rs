//! Notification counter aggregator
//!
//! Per-category unread counters reconciled from three producers: REST
//! snapshots, push deltas and local read actions. Every write goes through
//! the single [`NotificationAggregator::apply`] reducer so no two updates
//! commit out of causal order. After a dropped push channel the snapshot is
//! re-fetched and replaces the counters outright — deltas accumulated since
//! the last confirmed snapshot are discarded, never replayed.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::types::NotificationCategory;

/// One update to the counter state
#[derive(Debug, Clone)]
pub enum CounterUpdate {
    /// Authoritative REST snapshot; replaces all counters and ownership
    Snapshot {
        counts: HashMap<NotificationCategory, u32>,
        owners: HashMap<String, NotificationCategory>,
    },
    /// A matching push event arrived for a new notification
    Push { id: String, tag: String },
    /// An existing notification changed; refresh ownership, no increment
    Refresh { id: String, tag: String },
    /// The user read one notification
    Read { id: String },
    /// A notification was removed server-side while still unread
    Deleted { id: String },
    /// The server cleared everything
    AllRead,
}

/// Serialized reducer over the per-category unread counters
#[derive(Debug, Default)]
pub struct NotificationAggregator {
    counts: HashMap<NotificationCategory, u32>,
    /// Which category each live notification id belongs to; consumed by
    /// `Read` so a repeated read of the same id is a no-op
    owners: HashMap<String, NotificationCategory>,
    /// Set after a channel drop; cleared by the next snapshot
    stale: bool,
}

impl NotificationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update; the only mutation path
    pub fn apply(&mut self, update: CounterUpdate) {
        match update {
            CounterUpdate::Snapshot { counts, owners } => {
                info!("replacing counters from snapshot ({} categories)", counts.len());
                self.counts = counts;
                self.owners = owners;
                self.stale = false;
            }
            CounterUpdate::Push { id, tag } => {
                let category = NotificationCategory::from_tag(&tag);
                *self.counts.entry(category).or_insert(0) += 1;
                self.owners.insert(id, category);
            }
            CounterUpdate::Refresh { id, tag } => {
                let category = NotificationCategory::from_tag(&tag);
                self.owners.entry(id).or_insert(category);
            }
            CounterUpdate::Read { id } => match self.owners.remove(&id) {
                Some(category) => {
                    let count = self.counts.entry(category).or_insert(0);
                    *count = count.saturating_sub(1);
                }
                None => debug!("read for unknown or already-read notification {}", id),
            },
            CounterUpdate::Deleted { id } => {
                if let Some(category) = self.owners.remove(&id) {
                    let count = self.counts.entry(category).or_insert(0);
                    *count = count.saturating_sub(1);
                }
            }
            CounterUpdate::AllRead => {
                self.counts.clear();
                self.owners.clear();
            }
        }
    }

    /// Unread count for one category
    pub fn count(&self, category: NotificationCategory) -> u32 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    /// Total unread across all categories
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// Counter map snapshot for the UI
    pub fn counts(&self) -> HashMap<NotificationCategory, u32> {
        let mut all: HashMap<NotificationCategory, u32> = NotificationCategory::all()
            .into_iter()
            .map(|c| (c, 0))
            .collect();
        for (category, count) in &self.counts {
            all.insert(*category, *count);
        }
        all
    }

    /// Mark the state unconfirmed after a push channel drop
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Whether a snapshot re-fetch is required
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_read_then_read_again() {
        let mut agg = NotificationAggregator::new();
        agg.apply(CounterUpdate::Push {
            id: "n1".to_string(),
            tag: "message".to_string(),
        });
        assert_eq!(agg.count(NotificationCategory::Messages), 1);

        agg.apply(CounterUpdate::Read {
            id: "n1".to_string(),
        });
        assert_eq!(agg.count(NotificationCategory::Messages), 0);

        // Second read of the same id never goes negative
        agg.apply(CounterUpdate::Read {
            id: "n1".to_string(),
        });
        assert_eq!(agg.count(NotificationCategory::Messages), 0);
    }

    #[test]
    fn test_read_touches_exactly_one_category() {
        let mut agg = NotificationAggregator::new();
        agg.apply(CounterUpdate::Push {
            id: "n1".to_string(),
            tag: "message".to_string(),
        });
        agg.apply(CounterUpdate::Push {
            id: "n2".to_string(),
            tag: "payment".to_string(),
        });

        agg.apply(CounterUpdate::Read {
            id: "n2".to_string(),
        });
        assert_eq!(agg.count(NotificationCategory::Messages), 1);
        assert_eq!(agg.count(NotificationCategory::Payments), 0);
    }

    #[test]
    fn test_unknown_tag_lands_in_other() {
        let mut agg = NotificationAggregator::new();
        agg.apply(CounterUpdate::Push {
            id: "n1".to_string(),
            tag: "mystery_event".to_string(),
        });
        assert_eq!(agg.count(NotificationCategory::Other), 1);
    }

    #[test]
    fn test_snapshot_replaces_accumulated_deltas() {
        let mut agg = NotificationAggregator::new();
        for i in 0..4 {
            agg.apply(CounterUpdate::Push {
                id: format!("n{}", i),
                tag: "message".to_string(),
            });
        }
        agg.mark_stale();
        assert!(agg.is_stale());

        // Authoritative snapshot says 1 — the 4 unconfirmed deltas are
        // discarded, not replayed on top
        let mut counts = HashMap::new();
        counts.insert(NotificationCategory::Messages, 1);
        agg.apply(CounterUpdate::Snapshot {
            counts,
            owners: HashMap::new(),
        });
        assert_eq!(agg.count(NotificationCategory::Messages), 1);
        assert!(!agg.is_stale());
    }

    #[test]
    fn test_all_read_clears_everything() {
        let mut agg = NotificationAggregator::new();
        agg.apply(CounterUpdate::Push {
            id: "n1".to_string(),
            tag: "listing".to_string(),
        });
        agg.apply(CounterUpdate::AllRead);
        assert_eq!(agg.total(), 0);

        // Ownership was cleared too; stray read is harmless
        agg.apply(CounterUpdate::Read {
            id: "n1".to_string(),
        });
        assert_eq!(agg.total(), 0);
    }

    #[test]
    fn test_deleted_unread_decrements() {
        let mut agg = NotificationAggregator::new();
        agg.apply(CounterUpdate::Push {
            id: "n1".to_string(),
            tag: "comment".to_string(),
        });
        agg.apply(CounterUpdate::Deleted {
            id: "n1".to_string(),
        });
        assert_eq!(agg.count(NotificationCategory::Comments), 0);
    }
}
