//! Error types for the HTTP service

use audit_keeper_core::{ErrorCategory, IntakeError, ReplayError, ValidationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{error, warn};

/// Request handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: malformed parameters or an invalid send rate
/// - `404 Not Found`: unknown replay id
/// - `409 Conflict`: the replay's current state forbids the action
/// - `500 Internal Server Error`: the audit could not be delivered anywhere
/// - `503 Service Unavailable`: the status store or another dependency failed
///   transiently and the request may be retried
///
/// Messages returned to clients are the operator-facing error text; they
/// never carry internal stack details.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed request parameter
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Replay control failure; status depends on the error category
    #[error("{0}")]
    Replay(#[from] ReplayError),

    /// Publishing and fallback both failed
    #[error("{0}")]
    Intake(#[from] IntakeError),

    /// Unexpected server-side failure
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Replay(e) => match e.error_category() {
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::Conflict => StatusCode::CONFLICT,
                ErrorCategory::Permanent | ErrorCategory::Configuration => StatusCode::BAD_REQUEST,
                ErrorCategory::Transient => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Intake(_) | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (message, retry_after) = match &self {
            Self::Internal { message } => {
                error!(error = %message, "Internal server error occurred");
                (
                    "Internal server error occurred. Please try again later.".to_string(),
                    None,
                )
            }
            Self::Intake(e) => {
                error!(audit_id = %e.audit_id, attempts = e.attempts, error = %e.last_error, "Audit intake exhausted");
                (self.to_string(), None)
            }
            _ if status == StatusCode::SERVICE_UNAVAILABLE => {
                warn!(error = %self, "Dependency unavailable");
                (self.to_string(), Some(5))
            }
            _ => (self.to_string(), None),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_seconds) = retry_after {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Startup failed: {message}")]
    StartupFailed { message: String },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}
