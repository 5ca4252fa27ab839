//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram): latency distribution
//! - `http_open_connections` (gauge): current connection count
//! - `http_connections_rejected_total` (counter): per-IP limit refusals
//! - `http_drain_timeouts_total` (counter): shutdowns that hit the drain deadline

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, latency: Duration) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("http_request_duration_seconds").record(latency.as_secs_f64());
}

pub fn connection_opened() {
    gauge!("http_open_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("http_open_connections").decrement(1.0);
}

pub fn connection_rejected() {
    counter!("http_connections_rejected_total").increment(1);
}

pub fn record_drain_timeout() {
    counter!("http_drain_timeouts_total").increment(1);
}
