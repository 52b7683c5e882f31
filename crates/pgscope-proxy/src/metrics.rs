//! Prometheus metrics for the pgscope proxy
//!
//! Exports counters for connection lifecycle, forwarded traffic, and the
//! observer pipeline. Served at `/metrics` by the HTTP endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Client connections accepted since startup
pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pgscope_connections_total",
        "Total client connections accepted"
    )
    .unwrap()
});

/// Currently proxied connections
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "pgscope_connections_active",
        "Currently proxied connections"
    )
    .unwrap()
});

/// Bytes forwarded, labelled by direction (frontend = client to server)
pub static BYTES_FORWARDED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pgscope_bytes_forwarded_total",
        "Bytes forwarded through the proxy",
        &["direction"]
    )
    .unwrap()
});

/// Packets released by the reassembler, labelled by origin
pub static PACKETS_ASSEMBLED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pgscope_packets_assembled_total",
        "Packets released by the reassembler",
        &["origin"]
    )
    .unwrap()
});

/// Query records emitted, labelled by outcome (completed / failed)
pub static QUERIES_OBSERVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pgscope_queries_observed_total",
        "Query records emitted to the sink",
        &["outcome"]
    )
    .unwrap()
});

/// Backend outcomes that arrived with an empty correlation FIFO
pub static OUTCOMES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pgscope_outcomes_dropped_total",
        "Backend outcomes dropped for lack of a pending query"
    )
    .unwrap()
});

/// Force registration of all metrics at startup so they appear in scrapes
/// before first use
pub fn init_metrics() {
    Lazy::force(&CONNECTIONS_TOTAL);
    Lazy::force(&CONNECTIONS_ACTIVE);
    Lazy::force(&BYTES_FORWARDED);
    Lazy::force(&PACKETS_ASSEMBLED);
    Lazy::force(&QUERIES_OBSERVED);
    Lazy::force(&OUTCOMES_DROPPED);
}

/// Render the default registry in Prometheus text format
pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
