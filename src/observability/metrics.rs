//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wirepool_proxy_requests_total` (counter): by method, status, cache outcome
//! - `wirepool_proxy_request_duration_seconds` (histogram): forward latency
//! - `wirepool_cache_lookups_total` (counter): hit / miss
//! - `wirepool_tunnels_total` (counter): CONNECT outcomes
//! - `wirepool_connection_events_total` (counter): registry lifecycle events
//! - `wirepool_bytes_total` (counter): by direction
//! - `wirepool_registry_connections` (gauge): registered upstream connections

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

use crate::registry::{ConnectionRegistry, LifecycleEvent, SubscriptionId};

const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("wirepool_proxy_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )?
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, cache: &'static str, start: Instant) {
    metrics::counter!(
        "wirepool_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "cache" => cache
    )
    .increment(1);
    metrics::histogram!("wirepool_proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("wirepool_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_tunnel(outcome: &'static str) {
    metrics::counter!("wirepool_tunnels_total", "outcome" => outcome).increment(1);
}

pub fn record_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("wirepool_bytes_total", "direction" => direction).increment(bytes);
}

/// Feed registry lifecycle events into metrics.
///
/// The subscriber holds the registry weakly, so it never extends its life.
pub fn track_registry(registry: &ConnectionRegistry) -> SubscriptionId {
    let weak = registry.downgrade();
    registry.events().subscribe_all(move |event| {
        metrics::counter!("wirepool_connection_events_total", "event" => event.kind().as_str()).increment(1);
        match event {
            LifecycleEvent::DataSent { bytes, .. } => record_bytes("sent", *bytes as u64),
            LifecycleEvent::DataReceived { bytes, .. } => record_bytes("received", *bytes as u64),
            _ => {
                if let Some(registry) = weak.upgrade() {
                    metrics::gauge!("wirepool_registry_connections").set(registry.len() as f64);
                }
            }
        }
    })
}
