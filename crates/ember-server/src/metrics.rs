//! Metrics collection and export for Ember.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "ember_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "ember_connections_active";
    pub const MESSAGES_TOTAL: &str = "ember_messages_total";
    pub const MESSAGES_BYTES: &str = "ember_messages_bytes";
    pub const USERS_ONLINE: &str = "ember_users_online";
    pub const BURNS_ARMED_TOTAL: &str = "ember_burns_armed_total";
    pub const BURNS_PENDING: &str = "ember_burns_pending";
    pub const LATENCY_SECONDS: &str = "ember_latency_seconds";
    pub const ERRORS_TOTAL: &str = "ember_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of socket events processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of socket events processed");
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a registered connection");
    metrics::describe_counter!(names::BURNS_ARMED_TOTAL, "Burn timers armed");
    metrics::describe_gauge!(names::BURNS_PENDING, "Burn timers waiting to fire");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound event handling latency in seconds"
    );
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

/// Record a socket event.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record inbound event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update the online user count.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record a newly armed burn timer.
pub fn record_burn_armed() {
    counter!(names::BURNS_ARMED_TOTAL).increment(1);
}

/// Update the pending burn timer count.
pub fn set_burns_pending(count: usize) {
    gauge!(names::BURNS_PENDING).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
