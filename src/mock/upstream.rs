use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug)]
struct MockState {
    name: String,
    health_status: AtomicU16,
    delay_ms: AtomicU64,
    hits: AtomicUsize,
    last_forwarded_for: Mutex<Option<String>>,
}

/// An axum server on an ephemeral localhost port. Stops when dropped.
#[derive(Debug)]
pub struct MockUpstream {
    addr: SocketAddr,
    state: Arc<MockState>,
    stop: Option<oneshot::Sender<()>>,
}

impl MockUpstream {
    /// Bind `127.0.0.1:0` and start serving. Health starts at `200 OK`.
    pub async fn start(name: impl Into<String>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(MockState {
            name: name.into(),
            health_status: AtomicU16::new(StatusCode::OK.as_u16()),
            delay_ms: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            last_forwarded_for: Mutex::new(None),
        });

        let app = Router::new()
            .route("/health", get(health))
            .fallback(respond)
            .with_state(state.clone());

        let (stop, stopped) = oneshot::channel::<()>();
        let name = state.name.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(upstream = %name, error = %e, "Mock upstream stopped with error");
            }
        });

        tracing::debug!(upstream = %state.name, address = %addr, "Mock upstream listening");

        Ok(Self {
            addr,
            state,
            stop: Some(stop),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Status returned by `GET /health`.
    pub fn set_health_status(&self, status: StatusCode) {
        self.state.health_status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn health_status(&self) -> StatusCode {
        StatusCode::from_u16(self.state.health_status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
    }

    /// Delay applied before answering non-health requests.
    pub fn set_delay(&self, delay: Duration) {
        self.state.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Non-health requests served so far.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// `x-forwarded-for` of the most recent non-health request.
    pub fn last_forwarded_for(&self) -> Option<String> {
        self.state.last_forwarded_for.lock().clone()
    }

    /// Stop accepting connections.
    pub fn shutdown(mut self) {
        self.stop_server();
    }

    fn stop_server(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.stop_server();
    }
}

async fn health(State(state): State<Arc<MockState>>) -> StatusCode {
    StatusCode::from_u16(state.health_status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

async fn respond(State(state): State<Arc<MockState>>, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_forwarded_for.lock() = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&path) {
        response_headers.insert("x-upstream-path", value);
    }
    if let Ok(value) = HeaderValue::from_str(&state.name) {
        response_headers.insert("x-upstream-name", value);
    }

    (StatusCode::OK, response_headers, state.name.clone())
}
