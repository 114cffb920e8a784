// crates/server/src/error.rs
use axum::{
    extract::rejection::FormRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
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

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Message returned for a download request without a usable `url` field.
pub const NO_URL: &str = "No URL provided";

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The body could not be read as a form at all.
    #[error("Invalid form: {0}")]
    InvalidForm(#[from] FormRejection),

    #[error("Unauthorized")]
    Unauthorized,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone()))
            }
            ApiError::InvalidForm(rejection) => {
                tracing::warn!(error = %rejection, "Unreadable download form");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details(NO_URL, rejection.body_text()),
                )
            }
            ApiError::Unauthorized => {
                tracing::warn!("Unauthorized download attempt (invalid or missing token)");
                (StatusCode::UNAUTHORIZED, ErrorResponse::new("Unauthorized"))
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
