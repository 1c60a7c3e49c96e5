//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics for bridges, relay, compute and tunnels
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `relay_bridge_connections` (gauge): connected bridges
//! - `relay_bridge_pending_requests` (gauge): proxied calls awaiting a reply
//! - `relay_bridge_requests_total` (counter): proxied call outcomes
//! - `relay_bridge_request_duration_seconds` (histogram)
//! - `relay_tunnel_frames_total` (counter): forwarded / dropped ciphertext frames
//! - `relay_tunnel_sessions` (gauge): established encrypted sessions
//! - `relay_compute_units` (gauge): live compute units
//! - `relay_compute_operations_total` (counter): provision / terminate outcomes
//! - `relay_tunnel_registrations` (gauge)
//! - `relay_tunnel_probes_total` (counter) and `relay_tunnel_probe_duration_seconds` (histogram)

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn set_bridge_connections(count: usize) {
    gauge!("relay_bridge_connections").set(count as f64);
}

pub fn set_pending_requests(count: usize) {
    gauge!("relay_bridge_pending_requests").set(count as f64);
}

pub fn record_bridge_request(outcome: &'static str, start: Instant) {
    counter!("relay_bridge_requests_total", "outcome" => outcome).increment(1);
    histogram!("relay_bridge_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_tunnel_frame(outcome: &'static str) {
    counter!("relay_tunnel_frames_total", "outcome" => outcome).increment(1);
}

pub fn set_tunnel_sessions(count: usize) {
    gauge!("relay_tunnel_sessions").set(count as f64);
}

pub fn set_compute_units(count: usize) {
    gauge!("relay_compute_units").set(count as f64);
}

pub fn record_compute_operation(operation: &'static str, outcome: &'static str) {
    counter!(
        "relay_compute_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_tunnel_registrations(count: usize) {
    gauge!("relay_tunnel_registrations").set(count as f64);
}

pub fn record_tunnel_probe(healthy: bool, elapsed: Duration) {
    let outcome = if healthy { "reachable" } else { "unreachable" };
    counter!("relay_tunnel_probes_total", "outcome" => outcome).increment(1);
    histogram!("relay_tunnel_probe_duration_seconds").record(elapsed.as_secs_f64());
}
