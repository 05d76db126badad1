//! Error types for fleet operations.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use fleet_common::OperationResponse;

use crate::store::StoreError;

/// Errors from the mutating fleet operations.
///
/// Routing decisions never fail; an empty decision is a normal outcome.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Head not found: {0}")]
    HeadNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The in-memory state was updated but the store write failed.
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// The in-memory state was updated but the store breaker rejected the write.
    #[error("Circuit open for service '{0}'")]
    CircuitOpen(String),
}

impl FleetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FleetError::HeadNotFound(_) => StatusCode::NOT_FOUND,
            FleetError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FleetError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            FleetError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<&FleetError> for OperationResponse {
    fn from(err: &FleetError) -> Self {
        OperationResponse::failed(err.to_string())
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let body = Json(OperationResponse::from(&self));
        (self.status_code(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
