//! Error types and handling for the gateway.
//!
//! This module provides a unified error type [`AppError`] whose variants map
//! one-to-one onto the client-visible failure kinds, and renders each of them
//! as an error body shaped for the protocol the client speaks.

use crate::core::middleware::{ModelName, RouteName};
use crate::transformer::{Protocol, TransformError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Unparseable JSON or a missing/empty `model`
    #[error("Malformed request: {0}")]
    MalformedInput(String),

    /// Missing or wrong local key
    #[error("Unauthorized")]
    Unauthorized,

    /// No enabled route advertises the requested model
    #[error("No route for model '{model}'. Known models: {}", known.join(", "))]
    UnknownModel { model: String, known: Vec<String> },

    /// Redirect is enabled but its target cannot be resolved
    #[error("Redirect target not found: {0}")]
    RedirectMisconfigured(String),

    /// Every candidate failed at the transport level
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A request rewrite failed on a required field
    #[error("Adapter failure: {0}")]
    AdapterFailure(#[from] TransformError),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::UnknownModel { .. } => StatusCode::NOT_FOUND,
            AppError::RedirectMisconfigured(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AdapterFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error type string used inside protocol error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::MalformedInput(_) => "invalid_request_error",
            AppError::Unauthorized => "authentication_error",
            AppError::UnknownModel { .. } | AppError::RedirectMisconfigured(_) => {
                "not_found_error"
            }
            AppError::UpstreamUnavailable(_) => "api_error",
            AppError::AdapterFailure(_) | AppError::Config(_) | AppError::Internal(_) => {
                "api_error"
            }
        }
    }

    /// Render the error in the wire format of `protocol`.
    pub fn into_protocol_response(self, protocol: Protocol) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        build_protocol_error_response(protocol, status, self.error_type(), &message, None, None)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_protocol_response(Protocol::OpenAI)
    }
}

/// Build the JSON error body for a protocol.
pub fn build_protocol_error_body(
    protocol: Protocol,
    status: StatusCode,
    error_type: &str,
    message: &str,
) -> Value {
    match protocol {
        Protocol::Claude => json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message
            }
        }),
        Protocol::OpenAI => json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16()
            }
        }),
        Protocol::Gemini => json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
                "status": gemini_status(status)
            }
        }),
    }
}

/// Build a protocol-shaped error response carrying metric labels.
pub fn build_protocol_error_response(
    protocol: Protocol,
    status: StatusCode,
    error_type: &str,
    message: &str,
    model: Option<&str>,
    route: Option<&str>,
) -> Response {
    let body = build_protocol_error_body(protocol, status, error_type, message);
    let mut response = (status, Json(body)).into_response();

    if let Some(m) = model {
        response.extensions_mut().insert(ModelName(m.to_string()));
    }
    if let Some(r) = route {
        response.extensions_mut().insert(RouteName(r.to_string()));
    }

    response
}

/// Google RPC status name for an HTTP status.
fn gemini_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        _ => "INTERNAL",
    }
}

/// Replace every occurrence of `secret` in `text`.
///
/// Empty secrets leave the text untouched.
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "***")
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
