//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const POSTS_TOTAL: &str = "relay_posts_total";
    pub const HISTORY_QUERIES_TOTAL: &str = "relay_history_queries_total";
    pub const HISTORY_RESULTS_TOTAL: &str = "relay_history_results_total";
    pub const SUBSCRIPTIONS_TOTAL: &str = "relay_subscriptions_total";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "relay_subscriptions_active";
    pub const PUSH_BYTES: &str = "relay_push_bytes";
    pub const LATENCY_SECONDS: &str = "relay_post_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::POSTS_TOTAL, "Total number of posts by kind");
    metrics::describe_counter!(
        names::HISTORY_QUERIES_TOTAL,
        "Total number of history queries"
    );
    metrics::describe_counter!(
        names::HISTORY_RESULTS_TOTAL,
        "Total number of messages returned by history queries"
    );
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of subscriptions since server start"
    );
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of connected subscriptions"
    );
    metrics::describe_counter!(names::PUSH_BYTES, "Total bytes pushed to subscribers");
    metrics::describe_histogram!(names::LATENCY_SECONDS, "Post handling latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a handled post (`chat`, `private` or `raw`).
pub fn record_post(kind: &'static str) {
    counter!(names::POSTS_TOTAL, "kind" => kind).increment(1);
}

/// Record a history query and its result size.
pub fn record_history_query(results: usize) {
    counter!(names::HISTORY_QUERIES_TOTAL).increment(1);
    counter!(names::HISTORY_RESULTS_TOTAL).increment(results as u64);
}

/// Record bytes pushed to a subscriber.
pub fn record_push(bytes: usize) {
    counter!(names::PUSH_BYTES).increment(bytes as u64);
}

/// Record post latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that tracks a connected subscription for its lifetime.
pub struct SubscriptionMetricsGuard;

impl SubscriptionMetricsGuard {
    /// Create a new metrics guard, recording a subscription.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
        gauge!(names::SUBSCRIPTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SubscriptionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriptionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SUBSCRIPTIONS_ACTIVE).decrement(1.0);
    }
}
