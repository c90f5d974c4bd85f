//! Error types for the gatekeeper.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the stores, the scanner, and the admin surface.
///
/// Request-path failures (geolocation lookups, log appends) are handled where
/// they occur and never reach the requester; this type covers the paths where
/// an error must be reported rather than swallowed.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Durable store failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// An administrative operation was given a malformed IP address.
    #[error("invalid IP address '{0}'")]
    InvalidIp(String),
}

impl IntoResponse for GatekeeperError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatekeeperError::InvalidIp(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatekeeperError::Database(_) | GatekeeperError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = match &self {
            // Store internals stay out of responses; operators get the log line.
            GatekeeperError::Database(err) => {
                tracing::error!(error = %err, "Store failure surfaced to admin caller");
                "Store operation failed".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": body }))).into_response()
    }
}
