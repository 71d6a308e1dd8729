//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "rtc_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "rtc_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "rtc_connections_rejected_total";
    pub const EVENTS_TOTAL: &str = "rtc_events_total";
    pub const EVENTS_BYTES: &str = "rtc_events_bytes";
    pub const MESSAGES_PERSISTED: &str = "rtc_messages_persisted_total";
    pub const USERS_ONLINE: &str = "rtc_users_online";
    pub const DISPATCH_SECONDS: &str = "rtc_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "rtc_errors_total";
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
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrade requests refused before the handshake"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Events processed, by kind and direction");
    metrics::describe_counter!(names::EVENTS_BYTES, "Encoded event bytes, by direction");
    metrics::describe_counter!(
        names::MESSAGES_PERSISTED,
        "Direct messages accepted by the message store"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a live connection");
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Inbound event dispatch latency in seconds"
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

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an upgrade refused before the handshake.
pub fn record_rejection(reason: &'static str) {
    counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

/// Record an event crossing the socket.
pub fn record_event(kind: &'static str, direction: &'static str, bytes: usize) {
    counter!(names::EVENTS_TOTAL, "kind" => kind, "direction" => direction).increment(1);
    counter!(names::EVENTS_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a persisted direct message.
pub fn record_persisted() {
    counter!(names::MESSAGES_PERSISTED).increment(1);
}

/// Update online user count.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record dispatch latency.
pub fn record_dispatch(kind: &'static str, seconds: f64) {
    histogram!(names::DISPATCH_SECONDS, "kind" => kind).record(seconds);
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
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
