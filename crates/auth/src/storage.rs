use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tokio::sync::broadcast;
use tracing::{info, warn};

use weft_core::StoredAuth;
use weft_store::{KeyValueStore, StoreChange};
use weft_store_memory::MemoryStore;

use crate::config::StorageBackend;
use crate::error::AuthError;

/// The single active home of the auth record.
pub struct AuthStorage {
    backend: StorageBackend,
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl std::fmt::Debug for AuthStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStorage")
            .field("backend", &self.backend)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl AuthStorage {
    /// Non-persistent storage.
    pub fn memory(key: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::Memory,
            store: Arc::new(MemoryStore::new()),
            key: key.into(),
        }
    }

    /// Select storage for `backend`.
    ///
    /// `persistent` is the local store (for [`StorageBackend::Local`]) or
    /// the cookie jar (for [`StorageBackend::Cookie`]). When it is missing
    /// or reports itself unavailable the record lives in memory instead.
    pub async fn open(
        backend: StorageBackend,
        key: impl Into<String>,
        persistent: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let key = key.into();
        if backend == StorageBackend::Memory {
            return Self::memory(key);
        }
        match persistent {
            Some(store) if store.is_available().await => {
                info!(?backend, key = %key, "auth storage opened");
                Self { backend, store, key }
            }
            _ => {
                warn!(?backend, "auth storage unavailable, keeping the session in memory");
                Self::memory(key)
            }
        }
    }

    /// Backend actually in use after any fallback.
    pub fn backend(&self) -> StorageBackend {
        self.backend
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Result<Option<StoredAuth>, AuthError> {
        match self.store.get(&self.key).await? {
            Some(raw) => self.decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Persist `record`. A cookie lives exactly as long as the token; an
    /// already expired record is removed instead of written.
    pub async fn save(&self, record: &StoredAuth, now_ms: i64) -> Result<(), AuthError> {
        let json = serde_json::to_string(record).map_err(|e| AuthError::Malformed(e.to_string()))?;
        match self.backend {
            StorageBackend::Cookie => {
                let ttl = match record.remaining_ms(now_ms) {
                    Some(ms) if ms <= 0 => {
                        self.clear().await?;
                        return Ok(());
                    }
                    Some(ms) => Some(Duration::from_millis(ms.unsigned_abs())),
                    None => None,
                };
                let encoded = utf8_percent_encode(&json, NON_ALPHANUMERIC).to_string();
                self.store.set(&self.key, &encoded, ttl).await?;
            }
            StorageBackend::Memory | StorageBackend::Local => {
                self.store.set(&self.key, &json, None).await?;
            }
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), AuthError> {
        self.store.delete(&self.key).await?;
        Ok(())
    }

    /// Change notifications from the underlying store, for every key.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    /// Parse a raw stored value in this backend's encoding.
    pub fn decode(&self, raw: &str) -> Result<StoredAuth, AuthError> {
        let json = match self.backend {
            StorageBackend::Cookie => percent_decode_str(raw)
                .decode_utf8()
                .map_err(|e| AuthError::Malformed(e.to_string()))?
                .into_owned(),
            StorageBackend::Memory | StorageBackend::Local => raw.to_owned(),
        };
        serde_json::from_str(&json).map_err(|e| AuthError::Malformed(e.to_string()))
    }
}
