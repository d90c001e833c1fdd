use std::time::Duration;

/// Configuration for the [`OfflineQueue`](crate::OfflineQueue).
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// When disabled, requests are never queued or served from cache.
    pub enabled: bool,
    /// Store key holding the serialized queue.
    pub queue_key: String,
    /// Prefix for cached reads.
    pub cache_prefix: String,
    /// Pause between replayed events.
    pub throttle: Duration,
    /// Replay automatically on the offline to online transition.
    pub replay_on_reconnect: bool,
    /// Tag passed to the background-sync registrar after each enqueue.
    pub sync_tag: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_key: "weft:offline:queue".into(),
            cache_prefix: "weft:cache:".into(),
            throttle: Duration::from_millis(250),
            replay_on_reconnect: true,
            sync_tag: "weft-offline-replay".into(),
        }
    }
}
