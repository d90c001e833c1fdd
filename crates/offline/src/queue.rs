use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, instrument, warn};

use weft_core::{ActionError, EventId, OfflineEvent};
use weft_store::KeyValueStore;

use crate::config::OfflineConfig;
use crate::error::OfflineError;

const PROGRESS_CAPACITY: usize = 64;

/// Re-executes a queued event.
#[async_trait]
pub trait ReplayExecutor: Send + Sync {
    async fn replay(&self, event: &OfflineEvent) -> Result<(), ActionError>;
}

/// Host hook for scheduling a background sync after an enqueue.
pub trait SyncRegistrar: Send + Sync {
    fn register_sync(&self, tag: &str);
}

/// Replay progress. `completed == 0` is sent once before the first item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayProgress {
    pub completed: usize,
    pub total: usize,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Durable FIFO of pending mutating operations plus a read cache.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    config: OfflineConfig,
    executor: RwLock<Option<Arc<dyn ReplayExecutor>>>,
    registrar: RwLock<Option<Arc<dyn SyncRegistrar>>>,
    /// Serializes read-modify-write of the persisted queue.
    write_lock: Mutex<i64>,
    replaying: AtomicBool,
    online: watch::Sender<bool>,
    progress: broadcast::Sender<ReplayProgress>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("config", &self.config)
            .field("online", &*self.online.borrow())
            .field("replaying", &self.replaying.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Resets the single-flight flag when a replay pass ends, however it ends.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, config: OfflineConfig) -> Self {
        let (online, _) = watch::channel(true);
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self {
            store,
            config,
            executor: RwLock::new(None),
            registrar: RwLock::new(None),
            write_lock: Mutex::new(0),
            replaying: AtomicBool::new(false),
            online,
            progress,
        }
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Install the function that re-executes queued events.
    pub fn register_executor(&self, executor: Arc<dyn ReplayExecutor>) {
        *self.executor.write() = Some(executor);
    }

    pub fn set_sync_registrar(&self, registrar: Arc<dyn SyncRegistrar>) {
        *self.registrar.write() = Some(registrar);
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ReplayProgress> {
        self.progress.subscribe()
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Record a connectivity change. Going from offline to online triggers a
    /// replay when `replay_on_reconnect` is set; its report is returned.
    ///
    /// # Errors
    ///
    /// Propagates replay errors.
    pub async fn set_online(&self, online: bool) -> Result<Option<ReplayReport>, OfflineError> {
        let was_online = self.online.send_replace(online);
        if online == was_online {
            return Ok(None);
        }
        info!(online, "connectivity changed");
        if online && self.config.replay_on_reconnect {
            return self.replay_queue().await;
        }
        Ok(None)
    }

    async fn load(&self) -> Result<Vec<OfflineEvent>, OfflineError> {
        match self.store.get(&self.config.queue_key).await? {
            Some(raw) => {
                let mut events: Vec<OfflineEvent> =
                    serde_json::from_str(&raw).map_err(|e| OfflineError::Corrupt(e.to_string()))?;
                events.sort_by_key(|e| e.created_at);
                Ok(events)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, events: &[OfflineEvent]) -> Result<(), OfflineError> {
        if events.is_empty() {
            self.store.delete(&self.config.queue_key).await?;
            return Ok(());
        }
        let raw = serde_json::to_string(events).map_err(|e| OfflineError::Corrupt(e.to_string()))?;
        self.store.set(&self.config.queue_key, &raw, None).await?;
        Ok(())
    }

    /// Append an event. `created_at` is assigned here and is strictly
    /// greater than that of every event already queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    #[instrument(skip_all, fields(ds_id = %event.ds_id, kind = ?event.kind))]
    pub async fn queue_event(&self, mut event: OfflineEvent) -> Result<EventId, OfflineError> {
        let mut last = self.write_lock.lock().await;
        let mut events = self.load().await?;
        let newest = events.iter().map(|e| e.created_at).max().unwrap_or(0);
        let now = chrono::Utc::now().timestamp_millis();
        event.created_at = now.max(*last + 1).max(newest + 1);
        *last = event.created_at;

        let id = event.id.clone();
        events.push(event);
        self.save(&events).await?;
        drop(last);

        debug!(event_id = %id, pending = events.len(), "queued offline event");
        let registrar = self.registrar.read().clone();
        if let Some(registrar) = registrar {
            registrar.register_sync(&self.config.sync_tag);
        }
        Ok(id)
    }

    /// Queued events in replay order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub async fn pending(&self) -> Result<Vec<OfflineEvent>, OfflineError> {
        self.load().await
    }

    /// Drop every queued event.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn clear_queue(&self) -> Result<(), OfflineError> {
        let _lock = self.write_lock.lock().await;
        self.save(&[]).await
    }

    /// Replay a snapshot of the queue.
    ///
    /// Returns `Ok(None)` without doing anything when a pass is already
    /// running. Events enqueued while the pass runs are kept for the next
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`OfflineError::NoExecutor`] when no executor is registered,
    /// or a store error when the queue cannot be read or written. A failing
    /// event never aborts the pass.
    #[instrument(skip(self))]
    pub async fn replay_queue(&self) -> Result<Option<ReplayReport>, OfflineError> {
        if self.replaying.swap(true, Ordering::SeqCst) {
            debug!("replay already in progress");
            return Ok(None);
        }
        let _guard = ReplayGuard(&self.replaying);

        let executor = self.executor.read().clone();
        let Some(executor) = executor else {
            return Err(OfflineError::NoExecutor);
        };

        let snapshot = {
            let _lock = self.write_lock.lock().await;
            self.load().await?
        };
        let total = snapshot.len();
        let _ = self.progress.send(ReplayProgress { completed: 0, total });
        if total == 0 {
            return Ok(Some(ReplayReport::default()));
        }
        info!(total, "replaying offline queue");

        let mut report = ReplayReport::default();
        let mut failed = Vec::new();
        for (index, event) in snapshot.iter().enumerate() {
            match executor.replay(event).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        ds_id = %event.ds_id,
                        error = %e,
                        "offline replay failed"
                    );
                    report.failed += 1;
                    failed.push(event.clone());
                }
            }
            let _ = self.progress.send(ReplayProgress {
                completed: index + 1,
                total,
            });
            if index + 1 < total && !self.config.throttle.is_zero() {
                tokio::time::sleep(self.config.throttle).await;
            }
        }

        let _lock = self.write_lock.lock().await;
        let seen: HashSet<&EventId> = snapshot.iter().map(|e| &e.id).collect();
        let current = self.load().await?;
        let mut remaining = failed;
        remaining.extend(current.into_iter().filter(|e| !seen.contains(&e.id)));
        remaining.sort_by_key(|e| e.created_at);
        self.save(&remaining).await?;

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            remaining = remaining.len(),
            "offline replay finished"
        );
        Ok(Some(report))
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.cache_prefix)
    }

    /// Read a cached value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails or the entry is not JSON.
    pub async fn get_cached_data(
        &self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, OfflineError> {
        Ok(weft_store::get_json(self.store.as_ref(), &self.cache_key(key)).await?)
    }

    /// Write a cached value. No TTL is applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn set_cached_data(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), OfflineError> {
        weft_store::set_json(self.store.as_ref(), &self.cache_key(key), value, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use weft_core::{HttpMethod, OfflineEventKind};
    use weft_store_memory::MemoryStore;

    /// Fails every event whose body contains `"fail": true`.
    struct BodyFlagExecutor;

    #[async_trait]
    impl ReplayExecutor for BodyFlagExecutor {
        async fn replay(&self, event: &OfflineEvent) -> Result<(), ActionError> {
            let fail = event
                .body
                .as_ref()
                .and_then(|b| b.get("fail"))
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if fail {
                Err(ActionError::network(503, "still down"))
            } else {
                Ok(())
            }
        }
    }

    fn queue() -> OfflineQueue {
        let config = OfflineConfig {
            throttle: Duration::ZERO,
            ..OfflineConfig::default()
        };
        let queue = OfflineQueue::new(Arc::new(MemoryStore::new()), config);
        queue.register_executor(Arc::new(BodyFlagExecutor));
        queue
    }

    fn event(fail: bool) -> OfflineEvent {
        OfflineEvent::new(OfflineEventKind::Rest, "todos")
            .with_method(HttpMethod::Post)
            .with_body(serde_json::json!({"fail": fail}))
    }

    #[tokio::test]
    async fn created_at_is_strictly_increasing() {
        let queue = queue();
        for _ in 0..5 {
            queue.queue_event(event(false)).await.unwrap();
        }
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 5);
        assert!(pending.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn replaying_empty_queue_is_a_noop() {
        let queue = queue();
        let report = queue.replay_queue().await.unwrap().unwrap();
        assert_eq!(report, ReplayReport::default());
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_events_are_retained() {
        let queue = queue();
        let keep = queue.queue_event(event(true)).await.unwrap();
        queue.queue_event(event(false)).await.unwrap();
        queue.queue_event(event(false)).await.unwrap();

        let report = queue.replay_queue().await.unwrap().unwrap();
        assert_eq!(report, ReplayReport { succeeded: 2, failed: 1 });

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, keep);
    }

    #[tokio::test]
    async fn replay_without_executor_fails() {
        let queue = OfflineQueue::new(Arc::new(MemoryStore::new()), OfflineConfig::default());
        assert!(matches!(
            queue.replay_queue().await,
            Err(OfflineError::NoExecutor)
        ));
        assert!(!queue.is_replaying());
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let queue = queue();
        queue.queue_event(event(true)).await.unwrap();
        queue.clear_queue().await.unwrap();
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let queue = queue();
        assert!(queue.get_cached_data("GET:/todos").await.unwrap().is_none());
        queue
            .set_cached_data("GET:/todos", &serde_json::json!([1, 2]))
            .await
            .unwrap();
        assert_eq!(
            queue.get_cached_data("GET:/todos").await.unwrap(),
            Some(serde_json::json!([1, 2]))
        );
    }

    #[tokio::test]
    async fn reconnect_triggers_replay() {
        let queue = queue();
        assert!(queue.set_online(false).await.unwrap().is_none());
        queue.queue_event(event(false)).await.unwrap();

        let report = queue.set_online(true).await.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(queue.set_online(true).await.unwrap().is_none(), "no transition, no replay");
    }

    #[tokio::test]
    async fn registrar_is_notified_on_enqueue() {
        struct Count(parking_lot::Mutex<Vec<String>>);
        impl SyncRegistrar for Count {
            fn register_sync(&self, tag: &str) {
                self.0.lock().push(tag.to_owned());
            }
        }
        let queue = queue();
        let registrar = Arc::new(Count(parking_lot::Mutex::new(Vec::new())));
        queue.set_sync_registrar(registrar.clone());
        queue.queue_event(event(false)).await.unwrap();
        assert_eq!(registrar.0.lock().as_slice(), ["weft-offline-replay"]);
    }
}
