use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use thiserror::Error;

use crate::database::DatabaseError;

/// Error codes reported by the framework layer (router, extractors).
///
/// These take precedence over everything else during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Validation,
    NotFound,
    Parse,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Parse => "PARSE",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Typed failure categories that map to a status without inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Unauthorized,
    Unavailable,
    PayloadTooLarge,
}

/// Application-wide error type returned by handlers.
///
/// Rendering is deferred: [`IntoResponse`] only attaches the error to the
/// response, and the request pipeline classifies it into the public body and
/// emits the single log line for the failure.
///
/// # Typed vs. untyped failures
///
/// - `Unauthorized`, `ServiceUnavailable`, `PayloadTooLarge` and
///   connectivity-related `Database` errors carry their category directly.
/// - `Unexpected` and `Panic` are untyped; their message is the only signal
///   the classifier has.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(Value),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request format: {0}")]
    Parse(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl AppError {
    /// Build a validation error for a single field.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(serde_json::json!({
            "field": field,
            "message": message.into(),
        }))
    }

    /// Framework code for this error, if it has one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Validation(_) => Some(ErrorCode::Validation),
            AppError::NotFound(_) => Some(ErrorCode::NotFound),
            AppError::Parse(_) => Some(ErrorCode::Parse),
            AppError::Internal(_) | AppError::ConfigError(_) => {
                Some(ErrorCode::InternalServerError)
            }
            AppError::Unauthorized(_)
            | AppError::ServiceUnavailable(_)
            | AppError::PayloadTooLarge(_)
            | AppError::Database(_)
            | AppError::Panic(_)
            | AppError::Unexpected(_) => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            AppError::Unauthorized(_) => Some(ErrorCategory::Unauthorized),
            AppError::ServiceUnavailable(_) => Some(ErrorCategory::Unavailable),
            AppError::PayloadTooLarge(_) => Some(ErrorCategory::PayloadTooLarge),
            AppError::Database(e) if e.is_connectivity() => Some(ErrorCategory::Unavailable),
            _ => None,
        }
    }

    /// Short type name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Parse(_) => "ParseError",
            AppError::Unauthorized(_) => "UnauthorizedError",
            AppError::ServiceUnavailable(_) => "ServiceUnavailableError",
            AppError::PayloadTooLarge(_) => "PayloadTooLargeError",
            AppError::Internal(_) => "InternalError",
            AppError::ConfigError(_) => "ConfigError",
            AppError::Database(_) => "DatabaseError",
            AppError::Panic(_) => "Panic",
            AppError::Unexpected(_) => "Error",
        }
    }

    /// Raw message without the variant prefix. For `Unexpected` this is the
    /// full cause chain.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(v) => v.to_string(),
            AppError::NotFound(m)
            | AppError::Parse(m)
            | AppError::Unauthorized(m)
            | AppError::ServiceUnavailable(m)
            | AppError::PayloadTooLarge(m)
            | AppError::Internal(m)
            | AppError::ConfigError(m)
            | AppError::Panic(m) => m.clone(),
            AppError::Database(e) => e.to_string(),
            AppError::Unexpected(e) => format!("{e:#}"),
        }
    }

    /// Payload echoed as `details` outside production.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::Validation(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Debug rendering with cause chain (and backtrace when captured).
    pub fn stack_trace(&self) -> Option<String> {
        match self {
            AppError::Unexpected(e) => Some(format!("{e:?}")),
            AppError::Database(e) => Some(format!("{e:?}")),
            _ => None,
        }
    }

    /// Status used for the placeholder response before classification.
    fn status_hint(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Parse(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A handler failure travelling in response extensions until the pipeline
/// classifies it.
#[derive(Debug, Clone)]
pub struct HandlerFailure(Arc<AppError>);

impl HandlerFailure {
    pub fn new(error: AppError) -> Self {
        Self(Arc::new(error))
    }

    pub fn error(&self) -> &AppError {
        &self.0
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = self.status_hint().into_response();
        response.extensions_mut().insert(HandlerFailure::new(self));
        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
