//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream target with a stable identity
//! - Track live connections and in-flight forwards
//! - Own the heartbeat loop that keeps the health status current
//! - Drain in-flight work on removal
//!
//! # Upstream schemes
//! Targets must be plain `http://`. The forwarding and probing client is a
//! bare `HttpConnector` with no TLS stack, so `https://` upstreams are
//! rejected up front by [`parse_target`] rather than failing on every
//! request.

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, BodyDataStream};
use axum::http::{Request, Response, Uri, Version};
use futures_util::Stream;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};
use url::Url;
use uuid::Uuid;

use crate::config::HealthCheckConfig;
use crate::health::{BackendStatus, HealthChecker, HttpHealthChecker};
use crate::http::request::{append_forwarded_for, strip_hop_by_hop};
use crate::observability::metrics;

/// Client used to forward requests upstream.
pub type HttpClient = Client<HttpConnector, Body>;

/// Build the shared forwarding client.
pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Unique backend identity. Two backends for the same target still differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(Uuid);

impl BackendId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BackendId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BackendId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Errors raised while constructing a backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {0:?} (only http upstreams are supported)")]
    UnsupportedScheme(String),

    #[error("backend url {0:?} has no host")]
    MissingHost(String),

    #[error("backend url {url:?} is not a valid request target: {source}")]
    InvalidUri {
        url: String,
        #[source]
        source: axum::http::uri::InvalidUri,
    },
}

/// Errors raised while forwarding a request.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The backend was closed between selection and forwarding.
    #[error("backend {0} is closed")]
    BackendClosed(BackendId),

    #[error("upstream {target} request failed: {source}")]
    Upstream {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

/// Parse and normalize an upstream base URL. Only `http` is accepted.
pub fn parse_target(raw: &str) -> Result<Url, BackendError> {
    let url = Url::parse(raw).map_err(|source| BackendError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;

    if url.scheme() != "http" {
        return Err(BackendError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(BackendError::MissingHost(raw.to_string()));
    }

    Ok(url)
}

/// Where a backend was registered from. Config reloads only reconcile
/// backends that came from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendOrigin {
    Config,
    Runtime,
}

/// A single upstream target.
pub struct Backend {
    id: BackendId,
    target: Url,
    origin: BackendOrigin,
    /// Every forwarded request is rewritten to this URI.
    upstream_uri: Uri,

    status: RwLock<BackendStatus>,
    /// Serializes probes so concurrent checks apply in order.
    check_lock: Mutex<()>,
    checker: Arc<dyn HealthChecker>,

    /// Live connections (advisory, relaxed).
    connections: AtomicUsize,
    /// Forwards that `close` must wait for.
    in_flight: AtomicUsize,
    drained: Notify,

    heartbeat_started: AtomicBool,
    /// Flips to `true` exactly once, on close.
    cancel: watch::Sender<bool>,
}

impl Backend {
    /// Create a backend with an explicit health checker.
    pub fn new(target: Url, checker: Arc<dyn HealthChecker>) -> Result<Self, BackendError> {
        let mut request_target = target.clone();
        request_target.set_fragment(None);
        let upstream_uri = request_target
            .as_str()
            .parse()
            .map_err(|source| BackendError::InvalidUri {
                url: target.to_string(),
                source,
            })?;

        let (cancel, _) = watch::channel(false);

        Ok(Self {
            id: BackendId::new(),
            target,
            origin: BackendOrigin::Runtime,
            upstream_uri,
            status: RwLock::new(BackendStatus::Initial),
            check_lock: Mutex::new(()),
            checker,
            connections: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            heartbeat_started: AtomicBool::new(false),
            cancel,
        })
    }

    /// Parse `url` and probe it over HTTP using `health` settings.
    pub fn from_url(url: &str, health: &HealthCheckConfig) -> Result<Self, BackendError> {
        let target = parse_target(url)?;
        let checker = Arc::new(HttpHealthChecker::for_target(&target, health));
        Self::new(target, checker)
    }

    /// Mark where this backend came from. Defaults to `Runtime`.
    pub fn with_origin(mut self, origin: BackendOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn origin(&self) -> BackendOrigin {
        self.origin
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn status(&self) -> BackendStatus {
        *self.status.read()
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == BackendStatus::Healthy
    }

    /// Number of forwards currently open against this backend.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Probe the target once and record the outcome.
    ///
    /// A closed backend is never probed and never leaves `Closed`.
    pub async fn check_healthy(&self) -> BackendStatus {
        let _serial = self.check_lock.lock().await;

        if self.status().is_closed() {
            return BackendStatus::Closed;
        }

        let next = BackendStatus::from_probe(self.checker.is_healthy().await);

        let mut status = self.status.write();
        if status.is_closed() {
            return BackendStatus::Closed;
        }
        let previous = *status;
        if previous != next {
            tracing::info!(backend = %self.id, target = %self.target, from = %previous, to = %next, "Backend status changed");
        } else {
            tracing::trace!(backend = %self.id, status = %next, "Backend status unchanged");
        }
        *status = next;
        drop(status);

        metrics::record_backend_health(self.target.as_str(), next == BackendStatus::Healthy);
        metrics::record_connections(self.target.as_str(), self.connections());
        next
    }

    /// Spawn the heartbeat loop. Returns `false` if it was already started.
    ///
    /// The loop holds only a weak reference, so it also ends when the last
    /// `Arc<Backend>` is dropped.
    pub fn start_heartbeat(self: &Arc<Self>) -> bool {
        if self.heartbeat_started.swap(true, Ordering::AcqRel) {
            return false;
        }

        let backend = Arc::downgrade(self);
        let mut cancel = self.cancel.subscribe();
        let interval = self.checker.interval();
        let id = self.id;

        tokio::spawn(async move {
            tracing::debug!(backend = %id, interval = ?interval, "Heartbeat started");
            loop {
                if *cancel.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        let Some(backend) = backend.upgrade() else { break };
                        backend.check_healthy().await;
                    }
                }
            }
            tracing::debug!(backend = %id, "Heartbeat stopped");
        });

        true
    }

    /// Mark the backend closed, stop its heartbeat and wait for every
    /// in-flight forward to finish.
    ///
    /// Only the first call signals and drains; later calls return at once.
    /// There is no drain deadline: a stuck upstream stalls this call.
    pub async fn close(&self) {
        {
            let mut status = self.status.write();
            if status.is_closed() {
                return;
            }
            *status = BackendStatus::Closed;
        }

        self.cancel.send_replace(true);

        let pending = self.in_flight();
        tracing::info!(backend = %self.id, target = %self.target, in_flight = pending, "Backend closed, draining");
        self.wait_drained().await;
        tracing::info!(backend = %self.id, target = %self.target, "Backend drained");
    }

    async fn wait_drained(&self) {
        loop {
            // Register before checking the counter so a guard dropped in
            // between cannot be missed.
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Count a forward as in flight until the returned guard is dropped.
    ///
    /// Fails once the backend is `Closed`. The counter is raised before the
    /// status is read and `close` writes the status before reading the
    /// counter, so either the forward is refused or `close` waits for it.
    pub fn begin_forward(self: &Arc<Self>) -> Result<ForwardGuard, ForwardError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let open = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_connections(self.target.as_str(), open);
        let guard = ForwardGuard {
            backend: Arc::clone(self),
        };

        if self.status().is_closed() {
            drop(guard);
            tracing::debug!(backend = %self.id, "Forward refused, backend closed");
            return Err(ForwardError::BackendClosed(self.id));
        }
        Ok(guard)
    }

    /// Proxy `request` to this backend.
    ///
    /// Scheme, authority, path and query are replaced by the backend target.
    /// The backend stays in flight until the response body has been fully
    /// streamed or dropped.
    pub async fn forward(
        self: &Arc<Self>,
        client: &HttpClient,
        request: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Result<Response<Body>, ForwardError> {
        let guard = self.begin_forward()?;

        let (mut parts, body) = request.into_parts();
        parts.uri = self.upstream_uri.clone();
        parts.version = Version::HTTP_11;
        strip_hop_by_hop(&mut parts.headers);
        if let Some(peer) = peer {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        let response = client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|source| ForwardError::Upstream {
                target: self.target.to_string(),
                source,
            })?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let body = Body::from_stream(GuardedStream {
            inner: Body::new(body).into_data_stream(),
            _guard: guard,
        });

        Ok(Response::from_parts(parts, body))
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("target", &self.target.as_str())
            .field("origin", &self.origin)
            .field("status", &self.status())
            .field("connections", &self.connections())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// RAII guard for one forward. Releases the connection and in-flight
/// counts on drop, including on error, panic and cancellation.
#[derive(Debug)]
pub struct ForwardGuard {
    backend: Arc<Backend>,
}

impl Drop for ForwardGuard {
    fn drop(&mut self) {
        let open = self.backend.connections.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::record_connections(self.backend.target.as_str(), open);
        if self.backend.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.backend.drained.notify_waiters();
        }
    }
}

/// Response body stream that keeps its forward counted until exhausted.
struct GuardedStream {
    inner: BodyDataStream,
    _guard: ForwardGuard,
}

impl Stream for GuardedStream {
    type Item = <BodyDataStream as Stream>::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
