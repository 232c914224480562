use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::health::BackendStatus;
use crate::load_balancer::{Backend, BackendError, BackendId, BackendOrigin, PoolError};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub backends: usize,
    pub healthy_backends: usize,
    pub total_connections: usize,
}

#[derive(Debug, Serialize)]
pub struct BackendView {
    pub id: BackendId,
    pub url: String,
    pub origin: BackendOrigin,
    pub status: BackendStatus,
    pub connections: usize,
}

impl From<&Backend> for BackendView {
    fn from(backend: &Backend) -> Self {
        Self {
            id: backend.id(),
            url: backend.target().to_string(),
            origin: backend.origin(),
            status: backend.status(),
            connections: backend.connections(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddBackendRequest {
    pub url: String,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    InvalidBackend(#[from] BackendError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("backend {0} not found")]
    NotFound(BackendId),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::InvalidBackend(_) => StatusCode::BAD_REQUEST,
            AdminError::Pool(e) => e.status_code(),
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        backends: state.pool.len(),
        healthy_backends: state.pool.healthy_count(),
        total_connections: state.pool.total_connections(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendView>> {
    let views = state
        .pool
        .backends()
        .iter()
        .map(|b| BackendView::from(b.as_ref()))
        .collect();
    Json(views)
}

pub async fn add_backend(
    State(state): State<AdminState>,
    Json(request): Json<AddBackendRequest>,
) -> Result<(StatusCode, Json<BackendView>), AdminError> {
    let backend = Arc::new(Backend::from_url(&request.url, &state.health_check)?);
    state.pool.add(backend.clone()).await?;
    tracing::info!(backend = %backend.id(), target = %backend.target(), "Backend added via admin API");
    Ok((StatusCode::CREATED, Json(BackendView::from(backend.as_ref()))))
}

pub async fn remove_backend(
    State(state): State<AdminState>,
    Path(id): Path<BackendId>,
) -> Result<StatusCode, AdminError> {
    match state.pool.remove_id(id).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(AdminError::NotFound(id)),
    }
}
