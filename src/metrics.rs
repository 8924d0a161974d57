// Prometheus metrics for the relay
//
// Exposed on the relay listener's /metrics endpoint:
// - Relay request outcomes (counter)
// - Upstream fetch latency (histogram)
// - Whitelist mutations from the admin console (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounterVec, Registry, TextEncoder};
use std::sync::{Arc, Once};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref RELAY_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("relay_requests_total", "Relay requests by gate and fetch outcome"),
        &["outcome"]
    ).expect("Failed to create relay requests metric");

    pub static ref UPSTREAM_FETCH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("upstream_fetch_duration_seconds", "Upstream fetch duration in seconds"),
    ).expect("Failed to create upstream fetch duration metric");

    pub static ref WHITELIST_MUTATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("whitelist_mutations_total", "Whitelist entries added or removed"),
        &["op"]
    ).expect("Failed to create whitelist mutations metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 3] = [
            Box::new(RELAY_REQUESTS_TOTAL.clone()),
            Box::new(UPSTREAM_FETCH_DURATION_SECONDS.clone()),
            Box::new(WHITELIST_MUTATIONS_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }
    });
}

/// Count one relay request under `outcome`
pub fn record_outcome(outcome: &str) {
    RELAY_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
