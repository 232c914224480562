//! Shared utilities for integration and load testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use roundproxy::config::{HealthCheckConfig, ProxyConfig};
use roundproxy::health::HealthChecker;
use roundproxy::lifecycle::Shutdown;
use roundproxy::load_balancer::backend::parse_target;
use roundproxy::mock::MockUpstream;
use roundproxy::{Backend, BackendPool, HttpServer};
use tokio::net::TcpListener;

/// A proxy serving `pool` on an ephemeral port. Shuts down on drop.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub pool: Arc<BackendPool>,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(pool: Arc<BackendPool>) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&ProxyConfig::default(), pool.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestProxy { addr, pool, shutdown }
}

/// Client without connection reuse so every request is a fresh forward.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Health checker flipped by the test, never by the network.
#[allow(dead_code)]
pub struct FlagChecker {
    healthy: AtomicBool,
}

#[allow(dead_code)]
impl FlagChecker {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
        })
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl HealthChecker for FlagChecker {
    fn is_healthy(&self) -> BoxFuture<'_, bool> {
        let healthy = self.healthy.load(Ordering::SeqCst);
        Box::pin(async move { healthy })
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

/// Register `upstream` with a flag-driven checker.
#[allow(dead_code)]
pub async fn register_flagged(pool: &BackendPool, upstream: &MockUpstream, healthy: bool) -> (Arc<Backend>, Arc<FlagChecker>) {
    let checker = FlagChecker::new(healthy);
    let backend = Arc::new(Backend::new(parse_target(&upstream.url()).unwrap(), checker.clone()).unwrap());
    pool.add(backend.clone()).await.unwrap();
    (backend, checker)
}

/// Register `upstream` with the real HTTP health checker.
#[allow(dead_code)]
pub async fn register_http(pool: &BackendPool, upstream: &MockUpstream, interval_secs: u64) -> Arc<Backend> {
    let health = HealthCheckConfig {
        interval_secs,
        timeout_secs: 1,
        ..HealthCheckConfig::default()
    };
    let backend = Arc::new(Backend::from_url(&upstream.url(), &health).unwrap());
    pool.add(backend.clone()).await.unwrap();
    backend
}

/// Poll `condition` every 10ms until it holds or `limit` passes.
#[allow(dead_code)]
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
