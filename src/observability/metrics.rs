//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): forwarded requests by backend, status
//! - `lb_request_duration_seconds` (histogram): latency by backend
//! - `lb_no_healthy_backend_total` (counter): requests rejected with 503
//! - `lb_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `lb_sticky_entries` (gauge): size of the cookie affinity map

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(backend: &str, status: u16, start: Instant) {
    let backend = backend.to_string();
    metrics::counter!("lb_requests_total", "backend" => backend.clone(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!("lb_request_duration_seconds", "backend" => backend)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_no_healthy_backend() {
    metrics::counter!("lb_no_healthy_backend_total").increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    metrics::gauge!("lb_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_sticky_entries(count: usize) {
    metrics::gauge!("lb_sticky_entries").set(count as f64);
}
