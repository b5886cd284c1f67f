//! Error handling for the ICE Tracker session service
//!
//! Nothing here is fatal to the process: every variant degrades one feature
//! and the session keeps running.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required external collaborator not configured
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Identity could not be established; blocks writes only
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Store listener failure; requires an explicit re-subscribe
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Recognizer call failed or returned a malformed response
    #[error("Recognition failed: {0}")]
    Recognition(String),

    /// Pin write rejected by the store
    #[error("Write failed: {0}")]
    Write(String),

    /// No current location fix
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    /// No active camera feed
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    /// Conflict (cycle already in flight)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether repeating the same user action can succeed
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            Error::ConfigurationMissing(_) | Error::Validation(_) | Error::NotFound(_)
        )
    }

    fn code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::ConfigurationMissing(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CONFIGURATION_MISSING")
            }
            Error::Authentication(_) => (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED"),
            Error::Subscription(_) => (StatusCode::BAD_GATEWAY, "SUBSCRIPTION_ERROR"),
            Error::Recognition(_) => (StatusCode::BAD_GATEWAY, "RECOGNITION_FAILED"),
            Error::Write(_) => (StatusCode::BAD_GATEWAY, "WRITE_FAILED"),
            Error::LocationUnavailable(_) => {
                (StatusCode::PRECONDITION_FAILED, "LOCATION_UNAVAILABLE")
            }
            Error::CameraUnavailable(_) => (StatusCode::PRECONDITION_FAILED, "CAMERA_UNAVAILABLE"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.code();
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message,
            "retryable": self.retryable(),
        }));

        (status, body).into_response()
    }
}
