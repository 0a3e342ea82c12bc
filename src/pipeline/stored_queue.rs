use crate::domain::{Event, EventRecord, RecordMigration, migrate_records};
use crate::storage::PersistentStore;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

/// Result of folding events into the stored queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendResult {
    pub persisted: bool,
    /// Oldest stored events dropped to stay within the retention ceiling.
    pub trimmed: usize,
}

/// The pipeline's durable retry queue: one store key holding a JSON array of records.
#[derive(Clone)]
pub struct StoredQueue {
    store: PersistentStore,
    key: String,
    max_events: usize,
}

impl StoredQueue {
    pub fn new(store: PersistentStore, key: impl Into<String>, max_events: usize) -> Self {
        Self {
            store,
            key: key.into(),
            max_events: max_events.max(1),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> RecordMigration {
        let value = self.store.get::<Value>(&self.key).await;
        let migration = migrate_records(value, Utc::now());

        if migration.migrated > 0 {
            debug!(
                "Upgraded {} legacy records in {}",
                migration.migrated, self.key
            );
        }
        if migration.dropped > 0 {
            warn!(
                "Dropped {} undecodable records from {}",
                migration.dropped, self.key
            );
        }

        migration
    }

    /// Append after the `stored_len` events already persisted.
    ///
    /// When the result would exceed the retention ceiling the queue is
    /// rewritten without its oldest events instead.
    pub async fn append(&self, events: &[Event], stored_len: usize) -> AppendResult {
        if events.is_empty() {
            return AppendResult {
                persisted: true,
                trimmed: 0,
            };
        }

        if stored_len + events.len() <= self.max_events {
            let records: Vec<EventRecord> = events.iter().cloned().map(EventRecord::from).collect();
            return AppendResult {
                persisted: self.store.append(&self.key, &records).await,
                trimmed: 0,
            };
        }

        let mut all = self.load().await.events;
        all.extend_from_slice(events);
        let excess = all.len().saturating_sub(self.max_events);
        all.drain(..excess);

        let persisted = self.replace(&all).await;
        if persisted && excess > 0 {
            warn!(
                "Stored queue {} over {} events, dropped {} oldest",
                self.key, self.max_events, excess
            );
        }

        AppendResult {
            persisted,
            trimmed: if persisted { excess } else { 0 },
        }
    }

    /// Overwrite the queue with `events`; an empty slice removes the key.
    pub async fn replace(&self, events: &[Event]) -> bool {
        if events.is_empty() {
            return self.store.remove(&self.key).await;
        }

        let records: Vec<EventRecord> = events.iter().cloned().map(EventRecord::from).collect();
        self.store.set(&self.key, &records).await
    }
}
