//! Active health checking.
//!
//! # Responsibilities
//! - Derive the probe URL from a backend target
//! - Issue a bounded `GET` and classify the outcome

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;
use url::Url;

use crate::config::HealthCheckConfig;
use crate::health::HealthChecker;

/// Probes `GET <target>/health` and treats anything but `200 OK` as unhealthy.
#[derive(Debug, Clone)]
pub struct HttpHealthChecker {
    url: Url,
    interval: Duration,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl HttpHealthChecker {
    pub fn new(url: Url, interval: Duration, timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            url,
            interval,
            timeout,
            client,
        }
    }

    /// Build a checker for `target`, replacing its path with the configured
    /// health path.
    pub fn for_target(target: &Url, config: &HealthCheckConfig) -> Self {
        let mut url = target.clone();
        url.set_path(&config.path);

        Self::new(
            url,
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// The URL being probed.
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn probe(&self) -> bool {
        let uri: Uri = match self.url.as_str().parse() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Invalid health check URI");
                return false;
            }
        };

        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "roundproxy-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => true,
            Ok(Ok(response)) => {
                tracing::debug!(url = %self.url, status = %response.status(), "Health check failed: non-200 status");
                false
            }
            Ok(Err(e)) => {
                tracing::debug!(url = %self.url, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(url = %self.url, timeout = ?self.timeout, "Health check failed: timeout");
                false
            }
        }
    }
}

impl HealthChecker for HttpHealthChecker {
    fn is_healthy(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.probe())
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}
