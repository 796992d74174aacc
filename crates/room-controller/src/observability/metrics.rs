//! Prometheus metrics for the Room Controller.
//!
//! Naming follows Prometheus conventions:
//! - `rc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `actor_type`: 3 values (registry, room, connection)
//! - `event`: bounded by the registered handler set (~20) plus `unknown`
//! - `outcome`: `ok` or a lower-case error code (~8)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns an error if bucket configuration is rejected or a recorder is
/// already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Signaling events: engine round-trips included, p99 target 250ms
        .set_buckets_for_metric(
            Matcher::Prefix("rc_event".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set event latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `rc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Metric: `rc_peers_active`
///
/// Peers across all rooms. Reconnects do not change it.
pub fn set_peers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_peers_active").set(count as f64);
}

/// Metric: `rc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_connections_active").set(count as f64);
}

// ============================================================================
// Event dispatch
// ============================================================================

/// Record one dispatched signaling event.
///
/// Metrics: `rc_events_total{event, outcome}`, `rc_event_latency_seconds{event}`
pub fn record_event(event: &str, outcome: &str, duration: Duration) {
    counter!("rc_events_total",
        "event" => event.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("rc_event_latency_seconds", "event" => event.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Metric: `rc_cascade_consumers_closed_total`
///
/// Consumers closed because their source producer went away.
pub fn record_cascade_closed(count: usize) {
    counter!("rc_cascade_consumers_closed_total").increment(count as u64);
}

/// Metric: `rc_reconnect_evictions_total`
pub fn record_reconnect_eviction() {
    counter!("rc_reconnect_evictions_total").increment(1);
}

// ============================================================================
// Actor health
// ============================================================================

/// Metric: `rc_actor_panics_total{actor_type}`
///
/// Any non-zero value is a bug.
pub fn record_actor_panic(actor_type: &str) {
    counter!("rc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Metric: `rc_messages_dropped_total{actor_type}`
///
/// Notices dropped because the receiving mailbox was full or closed.
pub fn record_message_dropped(actor_type: &str) {
    counter!("rc_messages_dropped_total", "actor_type" => actor_type.to_string()).increment(1);
}
