// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reelgrab_core::{DownloadError, UpstreamKind};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// Attach internal detail in debug builds only; release builds never
    /// echo it to clients.
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: cfg!(debug_assertions).then(|| details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No active download for client {0}")]
    NoActiveJob(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Status code for a download failure.
pub fn download_status(err: &DownloadError) -> StatusCode {
    match err {
        DownloadError::InvalidLocator(_) => StatusCode::BAD_REQUEST,
        DownloadError::Upstream { kind, .. } => match kind {
            UpstreamKind::InvalidUrl => StatusCode::BAD_REQUEST,
            UpstreamKind::AccessRestricted => StatusCode::FORBIDDEN,
            UpstreamKind::Unavailable => StatusCode::NOT_FOUND,
            UpstreamKind::CannotConnect => StatusCode::SERVICE_UNAVAILABLE,
            UpstreamKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        },
        DownloadError::AlreadyRunning { .. } | DownloadError::Cancelled => StatusCode::CONFLICT,
        DownloadError::TimedOut { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DownloadError::InsufficientSpace { .. } => StatusCode::INSUFFICIENT_STORAGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Download(err) => {
                let status = download_status(err);
                if status.is_server_error() {
                    tracing::error!(error = %err, class = ?err.class(), "Request failed");
                } else {
                    tracing::warn!(error = %err, class = ?err.class(), "Request rejected");
                }
                (
                    status,
                    ErrorResponse::with_details(err.user_message(), err.to_string()),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone()))
            }
            ApiError::NoActiveJob(client_id) => {
                tracing::debug!(client_id = %client_id, "No active download");
                (StatusCode::NOT_FOUND, ErrorResponse::new("No active download"))
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
