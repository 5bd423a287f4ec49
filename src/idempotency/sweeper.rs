use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::idempotency::storage::IdempotencyStore;
use crate::observability::get_metrics;

/// How often the background sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Background job deleting idempotency records past their TTL.
///
/// Purely storage reclamation: lookups already treat expired records as
/// absent. Sweeps are idempotent and may overlap, including across instances.
#[derive(Clone)]
pub struct IdempotencySweeper {
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
}

impl IdempotencySweeper {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            interval: SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one sweep and returns the number of records purged.
    pub async fn run_once(&self) -> Result<u64> {
        let purged = self.store.purge_expired().await?;
        get_metrics().record_idempotency_purged(purged);
        if purged > 0 {
            tracing::info!(
                purged,
                backend = self.store.backend_name(),
                "Purged expired idempotency records"
            );
        }
        Ok(purged)
    }

    /// Starts the sweep loop in a background task.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!("Failed to purge expired idempotency records: {}", e);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Idempotency sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to a running sweeper. Dropping it also stops the loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the loop to stop and waits for it. An in-flight sweep finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("Idempotency sweeper task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::record::IdempotencyRecord;
    use crate::idempotency::storage::InMemoryIdempotencyStore;
    use chrono::{Duration as ChronoDuration, Utc};

    async fn seeded_store() -> InMemoryIdempotencyStore {
        let store = InMemoryIdempotencyStore::new();
        let old = Utc::now() - ChronoDuration::hours(48);
        for key in ["a", "b", "c"] {
            store
                .try_insert(&IdempotencyRecord::new_at("u1", key, 200, "{}", None, old))
                .await
                .unwrap();
        }
        store
            .try_insert(&IdempotencyRecord::new("u1", "live", 200, "{}", None))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_default_interval_is_one_hour() {
        let sweeper = IdempotencySweeper::new(Arc::new(InMemoryIdempotencyStore::new()));
        assert_eq!(sweeper.interval(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_run_once_is_idempotent() {
        let store = seeded_store().await;
        let sweeper = IdempotencySweeper::new(Arc::new(store.clone()));

        assert_eq!(sweeper.run_once().await.unwrap(), 3);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_purge_each_record_once() {
        let store = seeded_store().await;
        let sweeper = IdempotencySweeper::new(Arc::new(store.clone()));

        let (a, b) = tokio::join!(sweeper.run_once(), sweeper.run_once());
        assert_eq!(a.unwrap() + b.unwrap(), 3);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_background_loop_sweeps_and_stops() {
        let store = seeded_store().await;
        let handle = IdempotencySweeper::new(Arc::new(store.clone()))
            .with_interval(Duration::from_millis(20))
            .start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.len().await, 1);
        assert!(!handle.is_finished());

        handle.shutdown().await;
    }
}
