//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by outcome
//! - `proxy_original_bytes_total` (counter): origin bytes behind transcoded responses
//! - `proxy_bytes_saved_total` (counter): origin bytes minus encoded bytes (may shrink)
//! - `proxy_transcode_duration_seconds` (histogram): codec time by output format
//! - `proxy_transcodes_in_flight` (gauge): held codec permits
//! - `proxy_cache_lookups_total` (counter): cache hits and misses
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the Prometheus recorder
//! - Low-overhead metric updates (atomic operations)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Count a finished request by how it ended.
pub fn record_request(outcome: &'static str) {
    counter!("proxy_requests_total", "outcome" => outcome).increment(1);
}

/// Account for a transcoded response.
pub fn record_savings(original_size: u64, encoded_size: u64) {
    counter!("proxy_original_bytes_total").increment(original_size);
    if let Some(saved) = original_size.checked_sub(encoded_size) {
        counter!("proxy_bytes_saved_total").increment(saved);
    }
}

pub fn record_transcode(format: &'static str, started: Instant) {
    histogram!("proxy_transcode_duration_seconds", "format" => format)
        .record(started.elapsed().as_secs_f64());
}

pub fn transcode_started() {
    gauge!("proxy_transcodes_in_flight").increment(1.0);
}

pub fn transcode_finished() {
    gauge!("proxy_transcodes_in_flight").decrement(1.0);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}
