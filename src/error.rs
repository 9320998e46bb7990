//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **`AppError`**: failures of the REST surface, converted into JSON HTTP responses.
//! - **`SessionError`**: failures of a live voice session (microphone, audio devices,
//!   the remote speech service, inbound audio decoding).
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of error
//! - **Data**: Each variant carries a human-readable detail string
//! - **Pattern matching**: Use `match` to route each failure differently
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types (enables `?`)
//! - **ResponseError trait**: Converts errors to HTTP responses
//! - **Display trait**: Defines how errors are formatted as strings

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors returned by the REST handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ValidationError**: Data validation failed (400 errors)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::NotFound(format!("Lead {} not found", id)));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts `AppError` into an HTTP response with a consistent JSON body:
///
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Server port cannot be 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
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

/// Configuration updates are validated with `anyhow`; a failure there means the
/// client asked for an invalid value, so it surfaces as a validation error.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

/// JSON parsing errors are almost always caused by the client, so they become 400s.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Failures that can happen while a live voice session is being set up or is running.
///
/// ## How each one is routed:
/// - **PermissionDenied**: microphone refused → session becomes unavailable
/// - **ConnectionFailure**: the remote session could not be opened → unavailable
/// - **Device**: an audio context could not be opened → unavailable
/// - **Provider**: the remote service reported an error mid-call → unavailable
/// - **ProviderClose**: the remote service closed the connection → teardown
/// - **Transport**: a single send/receive failed → logged, call continues
/// - **Decode**: one inbound audio chunk was malformed → that chunk is dropped
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    PermissionDenied(String),
    ConnectionFailure(String),
    Device(String),
    Provider(String),
    ProviderClose(Option<String>),
    Transport(String),
    Decode(String),
}

impl SessionError {
    /// Whether this error ends the call (as opposed to being logged and skipped).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Transport(_) | SessionError::Decode(_))
    }

    /// Machine-readable code sent to the browser.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied(_) => "permission_denied",
            SessionError::ConnectionFailure(_) => "connection_failure",
            SessionError::Device(_) => "device_error",
            SessionError::Provider(_) => "provider_error",
            SessionError::ProviderClose(_) => "provider_closed",
            SessionError::Transport(_) => "transport_error",
            SessionError::Decode(_) => "decode_error",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::PermissionDenied(msg) => write!(f, "Microphone permission denied: {}", msg),
            SessionError::ConnectionFailure(msg) => write!(f, "Could not open live session: {}", msg),
            SessionError::Device(msg) => write!(f, "Audio device error: {}", msg),
            SessionError::Provider(msg) => write!(f, "Live service error: {}", msg),
            SessionError::ProviderClose(Some(reason)) => write!(f, "Live service closed the session: {}", reason),
            SessionError::ProviderClose(None) => write!(f, "Live service closed the session"),
            SessionError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SessionError::Decode(msg) => write!(f, "Audio decode error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SessionError::PermissionDenied("refused".into()).is_fatal());
        assert!(SessionError::ConnectionFailure("refused".into()).is_fatal());
        assert!(SessionError::ProviderClose(None).is_fatal());
        assert!(!SessionError::Transport("broken pipe".into()).is_fatal());
        assert!(!SessionError::Decode("bad base64".into()).is_fatal());
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::ProviderClose(Some("going away".into()));
        assert_eq!(err.to_string(), "Live service closed the session: going away");
        assert_eq!(err.code(), "provider_closed");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::NotFound("lead".into()).error_response().status(),
            actix_web::http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(anyhow::anyhow!("port 0")).error_response().status(),
            actix_web::http::StatusCode::BAD_REQUEST
        );

        assert_eq!(
            AppError::Internal("ledger lock poisoned".into()).error_response().status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
