//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shopsync_engine::SyncError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Sync(SyncError::BusinessNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "Business not found".to_string(),
                Some(id.clone()),
            ),
            AppError::Sync(SyncError::Unauthorized(msg)) => {
                tracing::warn!("Rejected batch: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), Some(msg.clone()))
            }
            AppError::Sync(SyncError::Storage(e)) => {
                tracing::error!("Storage error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage unavailable".to_string(),
                    None,
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
