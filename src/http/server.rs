//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the dispatcher
//! - Wire up middleware (request ID, tracing, CORS, timeout)
//! - Bind server to listener and shut down on signal
//! - Dispatch requests: select a backend, forward, map errors

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::http::X_REQUEST_ID;
use crate::load_balancer::{backend::build_client, BackendPool, ForwardError, HttpClient};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<BackendPool>,
    pub client: HttpClient,
}

/// HTTP front end of the load balancer.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server dispatching into `pool`.
    pub fn new(config: &ProxyConfig, pool: Arc<BackendPool>) -> Self {
        let state = AppState {
            pool,
            client: build_client(Duration::from_secs(config.timeouts.connect_secs)),
        };

        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(CorsLayer::permissive())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for serving or driving with `oneshot`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Selects a backend and forwards the request through it.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let method = request.method().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let backend = match state.pool.select() {
        Ok(backend) => backend,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "No backend selected");
            let response = e.into_response();
            metrics::record_request(&method, response.status().as_u16(), "none", start_time);
            return response;
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        backend = %backend.id(),
        target = %backend.target(),
        "Forwarding request"
    );

    match backend.forward(&state.client, request, peer).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), backend.target().as_str(), start_time);
            response
        }
        Err(e) => {
            match &e {
                ForwardError::BackendClosed(_) => {
                    tracing::warn!(request_id = %request_id, backend = %backend.id(), "Backend removed after selection")
                }
                ForwardError::Upstream { .. } => {
                    tracing::error!(request_id = %request_id, backend = %backend.id(), error = %e, "Upstream error")
                }
            }
            let response = e.into_response();
            metrics::record_request(&method, response.status().as_u16(), backend.target().as_str(), start_time);
            response
        }
    }
}
