//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_active_connections` (gauge): open forwards per backend
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy
//!
//! Gauges of a registered backend are refreshed on every heartbeat. Once a
//! backend is removed nothing touches them again, and the exporter drops
//! them after the idle window.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use metrics_util::MetricKindMask;

/// Idle window for gauges: several missed heartbeats, never under 15s.
pub fn gauge_idle_timeout(health_interval: Duration) -> Duration {
    (health_interval * 3).max(Duration::from_secs(15))
}

fn builder(gauge_idle: Duration) -> PrometheusBuilder {
    PrometheusBuilder::new().idle_timeout(MetricKindMask::GAUGE, Some(gauge_idle))
}

/// Install the Prometheus recorder and its scrape listener.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr, health_interval: Duration) -> Result<(), BuildError> {
    let gauge_idle = gauge_idle_timeout(health_interval);
    builder(gauge_idle).with_http_listener(addr).install()?;
    tracing::info!(address = %addr, gauge_idle_secs = gauge_idle.as_secs(), "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

/// Advisory: concurrent updates may land out of order until the next
/// heartbeat rewrites the value.
pub fn record_connections(backend: &str, open: usize) {
    gauge!("proxy_active_connections", "backend" => backend.to_string()).set(open as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_window_covers_missed_heartbeats() {
        assert_eq!(gauge_idle_timeout(Duration::from_secs(1)), Duration::from_secs(15));
        assert_eq!(gauge_idle_timeout(Duration::from_secs(10)), Duration::from_secs(30));
    }

    #[test]
    fn removed_backend_gauges_expire() {
        let recorder = builder(Duration::from_millis(100)).build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_backend_health("http://127.0.0.1:9001/", true);
            record_connections("http://127.0.0.1:9001/", 2);
        });
        let rendered = handle.render();
        assert!(rendered.contains("proxy_backend_health{backend=\"http://127.0.0.1:9001/\"} 1"));
        assert!(rendered.contains("proxy_active_connections{backend=\"http://127.0.0.1:9001/\"} 2"));

        std::thread::sleep(Duration::from_millis(250));
        let rendered = handle.render();
        assert!(!rendered.contains("http://127.0.0.1:9001/"), "stale series still exported: {}", rendered);
    }
}
