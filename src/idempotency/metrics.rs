use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::observability::get_metrics;

/// In-process counters for idempotency handling.
///
/// Each `record_*` call also feeds the Prometheus recorder.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub bypassed_requests: AtomicU64,
    pub eligible_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub cached_responses: AtomicU64,
    pub race_losses: AtomicU64,
    pub uncached_responses: AtomicU64,
    pub store_errors: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bypassed(&self, reason: &str) {
        self.bypassed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("bypassed", reason);
    }

    pub fn record_eligible(&self) {
        self.eligible_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("replayed", "hit");
    }

    pub fn record_cached(&self) {
        self.cached_responses.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("cached", "inserted");
    }

    pub fn record_race_lost(&self) {
        self.race_losses.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("replayed", "race_lost");
    }

    pub fn record_uncached(&self, reason: &str) {
        self.uncached_responses.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_outcome("uncached", reason);
    }

    pub fn record_store_error(&self, operation: &str) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_store_error(operation);
    }

    pub fn replay_rate(&self) -> f64 {
        self.snapshot().replay_rate()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bypassed_requests: self.bypassed_requests.load(Ordering::Relaxed),
            eligible_requests: self.eligible_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            cached_responses: self.cached_responses.load(Ordering::Relaxed),
            race_losses: self.race_losses.load(Ordering::Relaxed),
            uncached_responses: self.uncached_responses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub bypassed_requests: u64,
    pub eligible_requests: u64,
    pub replayed_requests: u64,
    pub cached_responses: u64,
    pub race_losses: u64,
    pub uncached_responses: u64,
    pub store_errors: u64,
}

impl MetricsSnapshot {
    /// Share of eligible requests answered from the cache, race losses included.
    pub fn replay_rate(&self) -> f64 {
        if self.eligible_requests == 0 {
            0.0
        } else {
            (self.replayed_requests + self.race_losses) as f64 / self.eligible_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = IdempotencyMetrics::new();
        metrics.record_eligible();
        metrics.record_eligible();
        metrics.record_eligible();
        metrics.record_eligible();
        metrics.record_cached();
        metrics.record_replayed();
        metrics.record_race_lost();
        metrics.record_uncached("non_success_status");
        metrics.record_bypassed("missing_key");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.eligible_requests, 4);
        assert_eq!(snapshot.cached_responses, 1);
        assert_eq!(snapshot.replayed_requests, 1);
        assert_eq!(snapshot.race_losses, 1);
        assert_eq!(snapshot.uncached_responses, 1);
        assert_eq!(snapshot.bypassed_requests, 1);
        assert_eq!(snapshot.replay_rate(), 0.5);
    }

    #[test]
    fn test_replay_rate_without_traffic() {
        assert_eq!(IdempotencyMetrics::new().replay_rate(), 0.0);
    }
}
