//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **AppError**: failures of ordinary request/response endpoints, converted
//!   into JSON HTTP responses through actix's `ResponseError`.
//! - **SessionError**: failures of the live session bridge. These never become
//!   HTTP status codes: once the event stream is open, the bridge reports them
//!   to the browser as a terminal `error` event carrying the `Display` text.
//!
//! ## HTTP error body:
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "query must not be empty",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems (500)
    Internal(String),

    /// Client sent malformed data (400)
    BadRequest(String),

    /// Configuration file or environment problems (500)
    ConfigError(String),

    /// Input failed validation rules (400)
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failures of the live session bridge.
///
/// ## Taxonomy:
/// - **RequestNotFound**: the GET found no parked request within the pairing timeout
/// - **UpstreamConnect**: the upstream live session could not be opened
/// - **UpstreamStream**: the upstream failed after opening (send failure, error callback)
/// - **CapacityReached**: the broker already holds the maximum number of live sessions
/// - **AlreadyProcessing**: a second turn loop was started on a session that has one
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    RequestNotFound(String),
    UpstreamConnect(String),
    UpstreamStream(String),
    CapacityReached(usize),
    AlreadyProcessing(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::RequestNotFound(id) => {
                write!(f, "No pending request found for session {}", id)
            }
            SessionError::UpstreamConnect(msg) => {
                write!(f, "Failed to connect to live session: {}", msg)
            }
            SessionError::UpstreamStream(msg) => write!(f, "Live session error: {}", msg),
            SessionError::CapacityReached(max) => {
                write!(f, "Maximum concurrent live sessions ({}) reached", max)
            }
            SessionError::AlreadyProcessing(id) => {
                write!(f, "Session {} is already processing a turn", id)
            }
        }
    }
}

impl std::error::Error for SessionError {}
