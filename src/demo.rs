//! Self-contained demo: local mock upstreams whose health flaps, a swarm of
//! client loops, and a once-a-second connection report.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use clap::Args;
use tokio::net::TcpListener;

use roundproxy::config::{HealthCheckConfig, ProxyConfig};
use roundproxy::lifecycle::{signals::shutdown_signal, Shutdown};
use roundproxy::mock::MockUpstream;
use roundproxy::{Backend, BackendPool, HttpServer};

#[derive(Debug, Args)]
pub struct DemoArgs {
    /// Number of mock upstreams to start
    #[arg(long, default_value_t = 5)]
    backends: usize,

    /// Number of concurrent client loops
    #[arg(long, default_value_t = 50)]
    clients: usize,

    /// Proxy listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Probability that an upstream reports healthy at each flip
    #[arg(long, default_value_t = 0.9)]
    healthy_ratio: f32,
}

pub async fn run(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(BackendPool::new());
    let health = HealthCheckConfig {
        interval_secs: 1,
        ..HealthCheckConfig::default()
    };

    let mut upstreams = Vec::with_capacity(args.backends);
    for i in 0..args.backends {
        let upstream = Arc::new(MockUpstream::start(format!("upstream-{}", i)).await?);
        let backend = Arc::new(Backend::from_url(&upstream.url(), &health)?);
        pool.add(backend).await?;
        upstreams.push(upstream);
    }
    tracing::info!(backends = upstreams.len(), healthy = pool.healthy_count(), "Mock upstreams registered");

    for upstream in &upstreams {
        let upstream = upstream.clone();
        let ratio = args.healthy_ratio;
        tokio::spawn(async move {
            loop {
                let status = if fastrand::f32() < ratio {
                    StatusCode::OK
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                upstream.set_health_status(status);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        });
    }

    let shutdown = Shutdown::new();
    let listener = TcpListener::bind(&args.bind).await?;
    let proxy_url = format!("http://{}/hello", listener.local_addr()?);
    let server = HttpServer::new(&ProxyConfig::default(), pool.clone());
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(async move { server.run(listener, server_shutdown).await });

    let client = reqwest::Client::new();
    for _ in 0..args.clients {
        let client = client.clone();
        let url = proxy_url.clone();
        tokio::spawn(async move {
            loop {
                match client.get(&url).send().await {
                    Ok(response) => tracing::debug!(status = %response.status(), "Response"),
                    Err(e) => tracing::debug!(error = %e, "Request failed"),
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });
    }

    let mut report = tokio::time::interval(Duration::from_secs(1));
    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            _ = report.tick() => {
                tracing::info!(
                    total_connections = pool.total_connections(),
                    healthy = pool.healthy_count(),
                    "Connection count"
                );
            }
            _ = &mut signal => break,
        }
    }

    shutdown.trigger();
    server_task.await??;
    Ok(())
}
