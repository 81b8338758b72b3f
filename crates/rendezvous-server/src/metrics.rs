//! Metrics collection and export for Rendezvous.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "rendezvous_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "rendezvous_connections_active";
    pub const REGISTRATIONS_TOTAL: &str = "rendezvous_registrations_total";
    pub const PRESENCE_SIZE: &str = "rendezvous_presence_size";
    pub const FORWARDED_TOTAL: &str = "rendezvous_forwarded_total";
    pub const DROPPED_TOTAL: &str = "rendezvous_dropped_total";
    pub const MESSAGES_TOTAL: &str = "rendezvous_messages_total";
    pub const MESSAGES_BYTES: &str = "rendezvous_messages_bytes";
    pub const ERRORS_TOTAL: &str = "rendezvous_errors_total";
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
        names::REGISTRATIONS_TOTAL,
        "Total number of identity registrations"
    );
    metrics::describe_gauge!(names::PRESENCE_SIZE, "Current number of registered identities");
    metrics::describe_counter!(
        names::FORWARDED_TOTAL,
        "Signals delivered to a recipient, by kind"
    );
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Signals that could not be delivered, by reason"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of WebSocket messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of WebSocket messages");
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

/// Record a registration.
pub fn record_registration() {
    counter!(names::REGISTRATIONS_TOTAL).increment(1);
}

/// Update the presence set size.
pub fn set_presence_size(count: usize) {
    gauge!(names::PRESENCE_SIZE).set(count as f64);
}

/// Record a delivered signal.
pub fn record_forwarded(kind: &'static str) {
    counter!(names::FORWARDED_TOTAL, "kind" => kind).increment(1);
}

/// Record a dropped signal.
pub fn record_dropped(kind: &'static str, reason: &'static str) {
    counter!(names::DROPPED_TOTAL, "kind" => kind, "reason" => reason).increment(1);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
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

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
