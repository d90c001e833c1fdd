use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use weft_core::{ActionError, HttpMethod, OfflineEvent, OfflineEventKind};
use weft_offline::{OfflineConfig, OfflineQueue, ReplayExecutor, ReplayProgress, ReplayReport};
use weft_store_memory::MemoryStore;

/// Blocks every replay until released.
struct GatedExecutor {
    gate: Notify,
    started: Notify,
}

#[async_trait]
impl ReplayExecutor for GatedExecutor {
    async fn replay(&self, _event: &OfflineEvent) -> Result<(), ActionError> {
        self.started.notify_one();
        self.gate.notified().await;
        Ok(())
    }
}

struct AlwaysOk;

#[async_trait]
impl ReplayExecutor for AlwaysOk {
    async fn replay(&self, _event: &OfflineEvent) -> Result<(), ActionError> {
        Ok(())
    }
}

fn event() -> OfflineEvent {
    OfflineEvent::new(OfflineEventKind::Rest, "todos").with_method(HttpMethod::Post)
}

fn queue(throttle: Duration) -> Arc<OfflineQueue> {
    let config = OfflineConfig {
        throttle,
        ..OfflineConfig::default()
    };
    Arc::new(OfflineQueue::new(Arc::new(MemoryStore::new()), config))
}

#[tokio::test]
async fn concurrent_replay_is_single_flight_and_keeps_new_events() {
    let queue = queue(Duration::ZERO);
    let executor = Arc::new(GatedExecutor {
        gate: Notify::new(),
        started: Notify::new(),
    });
    queue.register_executor(executor.clone());
    queue.queue_event(event()).await.unwrap();

    let running = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.replay_queue().await })
    };
    executor.started.notified().await;
    assert!(queue.is_replaying());

    // A second pass while the first is running is a no-op.
    assert!(queue.replay_queue().await.unwrap().is_none());

    // Enqueued mid-pass: not part of the snapshot, must survive it.
    let late = queue.queue_event(event()).await.unwrap();

    executor.gate.notify_one();
    let report = running.await.unwrap().unwrap().unwrap();
    assert_eq!(report, ReplayReport { succeeded: 1, failed: 0 });

    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, late);
    assert!(!queue.is_replaying());
}

#[tokio::test]
async fn progress_is_reported_per_item() {
    let queue = queue(Duration::ZERO);
    queue.register_executor(Arc::new(AlwaysOk));
    for _ in 0..3 {
        queue.queue_event(event()).await.unwrap();
    }
    let mut rx = queue.subscribe_progress();

    let report = queue.replay_queue().await.unwrap().unwrap();
    assert_eq!(report, ReplayReport { succeeded: 3, failed: 0 });

    let mut seen = Vec::new();
    while let Ok(p) = rx.try_recv() {
        seen.push(p);
    }
    assert_eq!(
        seen,
        vec![
            ReplayProgress { completed: 0, total: 3 },
            ReplayProgress { completed: 1, total: 3 },
            ReplayProgress { completed: 2, total: 3 },
            ReplayProgress { completed: 3, total: 3 },
        ]
    );
}

#[tokio::test]
async fn replay_is_throttled_between_items() {
    tokio::time::pause();
    let queue = queue(Duration::from_millis(500));
    queue.register_executor(Arc::new(AlwaysOk));
    for _ in 0..3 {
        queue.queue_event(event()).await.unwrap();
    }

    let start = tokio::time::Instant::now();
    queue.replay_queue().await.unwrap();
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(1000),
        "two throttle pauses expected, got {elapsed:?}"
    );
    assert!(elapsed < Duration::from_millis(1500), "no pause after the last item, got {elapsed:?}");
}
