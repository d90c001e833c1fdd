use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use weft_store::{KeyValueStore, StoreChange, StoreError};

const CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    /// Returns `true` if this entry has passed its TTL deadline.
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory [`KeyValueStore`] backed by a [`DashMap`].
///
/// Entries are lazily evicted on read when their TTL has elapsed. Nothing
/// survives the process.
#[derive(Debug)]
pub struct MemoryStore {
    data: DashMap<String, Entry>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            data: DashMap::new(),
            changes,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.data.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: &str, value: Option<&str>) {
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            key: key.to_owned(),
            value: value.map(str::to_owned),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove_if(key, |_, e| e.is_expired());
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.data
            .entry(key.to_owned())
            .and_modify(|entry| {
                value.clone_into(&mut entry.value);
                entry.expires_at = expires_at;
            })
            .or_insert_with(|| Entry {
                value: value.to_owned(),
                expires_at,
            });
        self.notify(key, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let existed = match self.data.remove(key) {
            Some((_, entry)) => !entry.is_expired(),
            None => false,
        };
        if existed {
            self.notify(key, None);
        }
        Ok(existed)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.is_expired())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
