//! # Error Handling
//!
//! Error type for HTTP handlers and its conversion into JSON error
//! responses. Startup code (config loading, binding the listener) uses
//! `anyhow::Result`; request handlers return [`AppResult`].
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "handshake_error",
//!     "message": "No WebSocket UPGRADE header found",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors a request handler can return.
///
/// ## Error Categories:
/// - **Handshake**: A request reached the stream endpoint but is not a valid
///   WebSocket upgrade (400)
#[derive(Debug)]
pub enum AppError {
    Handshake(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Handshake(msg) => write!(f, "WebSocket handshake failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Handshake(msg) => (StatusCode::BAD_REQUEST, "handshake_error", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
