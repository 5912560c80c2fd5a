//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hostmux_requests_total` (counter): requests by listener, status
//! - `hostmux_request_duration_seconds` (histogram): latency by listener
//! - `hostmux_active_connections` (gauge): open client connections by listener
//! - `hostmux_reloads_total` (counter): reload attempts by outcome
//! - `hostmux_config_generation` (gauge): generation of the active snapshot
//! - `hostmux_tls_no_certificate_total` (counter): handshakes aborted for lack of a certificate
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is optional and serves its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(listener: &'static str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!("hostmux_requests_total", "listener" => listener, "status" => status).increment(1);
    metrics::histogram!("hostmux_request_duration_seconds", "listener" => listener)
        .record(start.elapsed().as_secs_f64());
}

pub fn connection_opened(listener: &'static str) {
    metrics::gauge!("hostmux_active_connections", "listener" => listener).increment(1.0);
}

pub fn connection_closed(listener: &'static str) {
    metrics::gauge!("hostmux_active_connections", "listener" => listener).decrement(1.0);
}

pub fn record_reload(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("hostmux_reloads_total", "outcome" => outcome).increment(1);
}

pub fn set_config_generation(generation: u64) {
    metrics::gauge!("hostmux_config_generation").set(generation as f64);
}

pub fn record_no_certificate() {
    metrics::counter!("hostmux_tls_no_certificate_total").increment(1);
}
