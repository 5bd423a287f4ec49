use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the payment API.
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_idempotency_outcome(&self, outcome: &str, reason: &str) {
        counter!("idempotency_requests_total", "outcome" => outcome.to_string(), "reason" => reason.to_string()).increment(1);
    }

    pub fn record_idempotency_store_error(&self, operation: &str) {
        counter!("idempotency_store_errors_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_idempotency_purged(&self, count: u64) {
        counter!("idempotency_purged_total").increment(count);
    }

    pub fn record_wallet_mutation(&self, kind: &str, currency: &str) {
        counter!("wallet_mutations_total", "kind" => kind.to_string(), "currency" => currency.to_string()).increment(1);
    }

    pub fn record_wallet_mutation_rejected(&self, kind: &str, reason: &str) {
        counter!("wallet_mutations_rejected_total", "kind" => kind.to_string(), "reason" => reason.to_string()).increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the metrics system and returns the Prometheus handle.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Requests seen by the idempotency layer, by outcome");
    describe_counter!("idempotency_store_errors_total", Unit::Count, "Idempotency store failures absorbed by failing open");
    describe_counter!("idempotency_purged_total", Unit::Count, "Expired idempotency records purged by the sweeper");

    describe_counter!("wallet_mutations_total", Unit::Count, "Deposits, withdrawals and transfers applied");
    describe_counter!("wallet_mutations_rejected_total", Unit::Count, "Wallet mutations rejected by business rules");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
