//! Admin API.
//!
//! Exposes the pool's registration operations over HTTP:
//!
//! ```text
//! GET    /admin/status          version, backend counts, total connections
//! GET    /admin/backends        registered backends in selection order
//! POST   /admin/backends        {"url": "..."} → register, returns the backend
//! DELETE /admin/backends/{id}   remove and drain, 204 when drained
//! ```
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.
//!
//! Backends added here carry `origin: runtime`. A `--watch` config reload
//! only drains `origin: config` backends, so runtime registrations survive
//! edits to the config file.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::HealthCheckConfig;
use crate::load_balancer::BackendPool;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub pool: Arc<BackendPool>,
    pub api_key: Arc<str>,
    /// Health settings for backends registered through the API.
    pub health_check: HealthCheckConfig,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends).post(add_backend))
        .route("/admin/backends/{id}", delete(remove_backend))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
