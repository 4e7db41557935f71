//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_connections_accepted_total` (counter): accepted client connections
//! - `balancer_schedule_total{outcome}` (counter): forwarded, no_backend, unreachable, ...
//! - `balancer_backend_health{backend}` (gauge): 1=up, 0=down
//! - `balancer_backend_ongoing{backend}` (gauge): sessions attributed to a backend
//! - `balancer_bytes_total{backend,direction}` (counter): forwarded bytes
//! - `balancer_probe_duration_seconds{backend}` (histogram): health probe latency
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_accepted() {
    counter!("balancer_connections_accepted_total").increment(1);
}

pub fn record_schedule_outcome(outcome: &'static str) {
    counter!("balancer_schedule_total", "outcome" => outcome).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    let value = if healthy { 1.0 } else { 0.0 };
    gauge!("balancer_backend_health", "backend" => backend.to_string()).set(value);
}

pub fn set_backend_ongoing(backend: &str, ongoing: usize) {
    gauge!("balancer_backend_ongoing", "backend" => backend.to_string()).set(ongoing as f64);
}

pub fn record_traffic(backend: &str, rx: u64, tx: u64) {
    counter!("balancer_bytes_total", "backend" => backend.to_string(), "direction" => "rx").increment(rx);
    counter!("balancer_bytes_total", "backend" => backend.to_string(), "direction" => "tx").increment(tx);
}

pub fn record_probe_duration(backend: &str, elapsed: Duration) {
    histogram!("balancer_probe_duration_seconds", "backend" => backend.to_string()).record(elapsed.as_secs_f64());
}
