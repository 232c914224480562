//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map pool and forwarding errors to HTTP status codes
//!
//! # Design Decisions
//! - Empty pool is a misconfiguration (500); no healthy backend is
//!   backpressure (503); a failed upstream call is a gateway error (502)
//! - Upstream responses are streamed back unmodified apart from
//!   hop-by-hop headers

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::load_balancer::{ForwardError, PoolError};

impl PoolError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PoolError::NoBackendsRegistered => StatusCode::INTERNAL_SERVER_ERROR,
            PoolError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            PoolError::AlreadyRegistered(_) | PoolError::BackendClosed(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl ForwardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ForwardError::BackendClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let message = match self {
            ForwardError::BackendClosed(_) => "Backend is draining",
            ForwardError::Upstream { .. } => "Upstream request failed",
        };
        (self.status_code(), message).into_response()
    }
}
