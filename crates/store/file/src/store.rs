use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use weft_store::{KeyValueStore, StoreChange, StoreError};

const CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    value: String,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl FileEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|exp| now_ms >= exp)
    }
}

type Entries = BTreeMap<String, FileEntry>;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Persistent store kept in a single JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Option<Entries>>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            path: path.into(),
            cache: Mutex::new(None),
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Entries, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Entries::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, entries: &Entries) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn notify(&self, key: &str, value: Option<&str>) {
        let _ = self.changes.send(StoreChange {
            key: key.to_owned(),
            value: value.map(str::to_owned),
        });
    }

    /// Re-read the file and broadcast a change for every key whose live
    /// value differs from the cached view. Returns the number of changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn reload(&self) -> Result<usize, StoreError> {
        let fresh = self.read_file().await?;
        let mut guard = self.cache.lock().await;
        let previous = guard.take().unwrap_or_default();
        let now = now_ms();

        let live = |entries: &Entries, key: &str| {
            entries
                .get(key)
                .filter(|e| !e.is_expired(now))
                .map(|e| e.value.clone())
        };

        let mut changed = 0;
        let keys: std::collections::BTreeSet<&String> =
            previous.keys().chain(fresh.keys()).collect();
        for key in keys {
            let before = live(&previous, key);
            let after = live(&fresh, key);
            if before != after {
                changed += 1;
                self.notify(key, after.as_deref());
            }
        }
        *guard = Some(fresh);
        if changed > 0 {
            debug!(path = %self.path.display(), changed, "file store reloaded external changes");
        }
        Ok(changed)
    }

    /// Poll the file for external changes until `cancel` fires.
    pub fn spawn_watcher(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.reload().await {
                            warn!(
                                error = %e,
                                path = %self.path.display(),
                                "file store reload failed"
                            );
                        }
                    }
                }
            }
        })
    }

    async fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut Entries) -> (T, bool),
    ) -> Result<T, StoreError> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        let Some(entries) = guard.as_mut() else {
            return Err(StoreError::Backend("file store cache not loaded".into()));
        };
        let (out, dirty) = f(entries);
        if dirty {
            self.write_file(entries).await?;
        }
        Ok(out)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = now_ms();
        self.with_entries(|entries| match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                (None, true)
            }
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| now_ms() + i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        self.with_entries(|entries| {
            entries.insert(
                key.to_owned(),
                FileEntry {
                    value: value.to_owned(),
                    expires_at,
                },
            );
            ((), true)
        })
        .await?;
        self.notify(key, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        let existed = self
            .with_entries(|entries| match entries.remove(key) {
                Some(entry) => (!entry.is_expired(now), true),
                None => (false, false),
            })
            .await?;
        if existed {
            self.notify(key, None);
        }
        Ok(existed)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        self.with_entries(|entries| {
            let keys = entries
                .iter()
                .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            (keys, false)
        })
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    async fn is_available(&self) -> bool {
        let Some(parent) = self.path.parent() else {
            return false;
        };
        let dir = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if tokio::fs::create_dir_all(dir).await.is_err() {
            return false;
        }
        match tokio::fs::metadata(dir).await {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::testing::run_store_conformance_tests;

    #[tokio::test]
    async fn conformance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));
        run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        {
            let store = FileStore::new(&path);
            store.set("queue", "[1,2]", None).await.unwrap();
        }
        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("queue").await.unwrap().as_deref(), Some("[1,2]"));
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));
        store.set("gone", "x", Some(Duration::ZERO)).await.unwrap();
        assert!(store.get("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reload_broadcasts_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let ours = FileStore::new(&path);
        let theirs = FileStore::new(&path);

        ours.set("auth", "old", None).await.unwrap();
        let mut rx = ours.subscribe();

        theirs.reload().await.unwrap();
        theirs.set("auth", "new", None).await.unwrap();

        assert_eq!(ours.reload().await.unwrap(), 1);
        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, "auth");
        assert_eq!(change.value.as_deref(), Some("new"));

        theirs.delete("auth").await.unwrap();
        assert_eq!(ours.reload().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().value, None);
    }

    #[tokio::test]
    async fn reports_availability() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("a").join("store.json"));
        assert!(store.is_available().await);
    }
}
