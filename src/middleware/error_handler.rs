//! Centralized error classification.
//!
//! Handler failures reach the [`ErrorClassifier`] as an [`AppError`] carried in
//! the response extensions (see [`HandlerFailure`](crate::error::HandlerFailure)).
//! The classifier maps it to a stable public status and message, emits the one
//! log line for the failure, and renders the JSON body.
//!
//! # Precedence
//!
//! First match wins:
//!
//! | Signal | Status | Public message |
//! |--------|--------|----------------|
//! | code `VALIDATION` | 400 | `Validation error` (+ details) |
//! | code `NOT_FOUND` | 404 | `Resource not found` |
//! | code `PARSE` | 400 | `Invalid request format` |
//! | code `INTERNAL_SERVER_ERROR` | 500 | `Internal server error` |
//! | category `Unauthorized` | 401 | `Unauthorized` |
//! | category `Unavailable` | 503 | `Service temporarily unavailable` |
//! | category `PayloadTooLarge` | 413 | `Request entity too large` |
//! | message contains `ECONNREFUSED` / `ETIMEDOUT` | 503 | `Service temporarily unavailable` |
//! | message contains `Unauthorized` / `Forbidden` | 401 | `Unauthorized` |
//! | anything else | 500 | raw message, or `Internal server error` in production |
//!
//! Message matching only ever sees failures with neither a code nor a typed
//! category.
//!
//! # Information Leakage
//!
//! Outside production the body carries the validation `details` and the error
//! `stack`. In production both are omitted and generic failures never echo
//! their message.

use std::any::Any;

use axum::Json;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{error, warn};

use crate::config::Environment;
use crate::error::{AppError, ErrorCategory, ErrorCode};
use crate::metrics;
use crate::models::ErrorBody;

pub const VALIDATION_MESSAGE: &str = "Validation error";
pub const NOT_FOUND_MESSAGE: &str = "Resource not found";
pub const PARSE_MESSAGE: &str = "Invalid request format";
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";
pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable";
pub const PAYLOAD_TOO_LARGE_MESSAGE: &str = "Request entity too large";
pub const INTERNAL_MESSAGE: &str = "Internal server error";

const UNAVAILABLE_MARKERS: [&str; 2] = ["ECONNREFUSED", "ETIMEDOUT"];
const UNAUTHORIZED_MARKERS: [&str; 2] = ["Unauthorized", "Forbidden"];

/// Request attributes used in error log lines.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub client_ip: String,
}

/// Result of classifying one failure. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorDescriptor {
    pub status: StatusCode,
    pub public_message: String,
    pub details: Option<Value>,
    pub stack_trace: Option<String>,
}

impl ErrorDescriptor {
    fn new(status: StatusCode, public_message: impl Into<String>) -> Self {
        Self {
            status,
            public_message: public_message.into(),
            details: None,
            stack_trace: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    environment: Environment,
}

impl ErrorClassifier {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// Classify `error` and log it once.
    pub fn classify(&self, error: &AppError, meta: &RequestMeta) -> ErrorDescriptor {
        let descriptor = self.describe(error);
        self.log(error, meta, &descriptor);
        metrics::record_error(descriptor.status.as_u16());
        descriptor
    }

    /// Classify, log and render in one step.
    pub fn respond(&self, error: &AppError, meta: &RequestMeta) -> Response {
        let descriptor = self.classify(error, meta);
        self.render(descriptor, &meta.path)
    }

    fn describe(&self, error: &AppError) -> ErrorDescriptor {
        let production = self.environment.is_production();

        let mut descriptor = match (error.code(), error.category()) {
            (Some(ErrorCode::Validation), _) => {
                let mut d = ErrorDescriptor::new(StatusCode::BAD_REQUEST, VALIDATION_MESSAGE);
                d.details = error.details();
                d
            }
            (Some(ErrorCode::NotFound), _) => {
                ErrorDescriptor::new(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
            }
            (Some(ErrorCode::Parse), _) => {
                ErrorDescriptor::new(StatusCode::BAD_REQUEST, PARSE_MESSAGE)
            }
            (None, Some(ErrorCategory::Unauthorized)) => {
                ErrorDescriptor::new(StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE)
            }
            (None, Some(ErrorCategory::Unavailable)) => {
                ErrorDescriptor::new(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE)
            }
            (None, Some(ErrorCategory::PayloadTooLarge)) => {
                ErrorDescriptor::new(StatusCode::PAYLOAD_TOO_LARGE, PAYLOAD_TOO_LARGE_MESSAGE)
            }
            (Some(ErrorCode::InternalServerError), _) => {
                ErrorDescriptor::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
            }
            (None, None) => classify_by_message(&error.message(), production),
        };

        descriptor.stack_trace = error.stack_trace();
        descriptor
    }

    fn log(&self, error: &AppError, meta: &RequestMeta, descriptor: &ErrorDescriptor) {
        let status = descriptor.status.as_u16();
        let code = error.code().map_or("UNKNOWN", |c| c.as_str());
        let stack = if self.environment.is_production() {
            None
        } else {
            descriptor.stack_trace.as_deref()
        };

        if descriptor.status.is_server_error() {
            error!(
                status,
                method = %meta.method,
                path = %meta.path,
                client_ip = %meta.client_ip,
                code,
                stack,
                "[{status}] {} {} ({}) - Code: {code} - {}: {}",
                meta.method,
                meta.path,
                meta.client_ip,
                error.name(),
                error.message()
            );
        } else {
            warn!(
                status,
                method = %meta.method,
                path = %meta.path,
                client_ip = %meta.client_ip,
                code,
                stack,
                "[{status}] {} {} ({}) - Code: {code} - {}: {}",
                meta.method,
                meta.path,
                meta.client_ip,
                error.name(),
                error.message()
            );
        }
    }

    /// Build the public JSON body for a descriptor.
    pub fn body(&self, descriptor: ErrorDescriptor, path: &str) -> ErrorBody {
        let verbose = !self.environment.is_production();
        ErrorBody {
            error: descriptor.public_message,
            details: descriptor.details.filter(|_| verbose),
            stack: descriptor.stack_trace.filter(|_| verbose),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            path: path.to_string(),
        }
    }

    pub fn render(&self, descriptor: ErrorDescriptor, path: &str) -> Response {
        let status = descriptor.status;
        (status, Json(self.body(descriptor, path))).into_response()
    }
}

/// Fallback for failures with no typed signal.
fn classify_by_message(message: &str, production: bool) -> ErrorDescriptor {
    if UNAVAILABLE_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorDescriptor::new(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE);
    }
    if UNAUTHORIZED_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorDescriptor::new(StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE);
    }

    let public_message = if production || message.is_empty() {
        INTERNAL_MESSAGE
    } else {
        message
    };
    ErrorDescriptor::new(StatusCode::INTERNAL_SERVER_ERROR, public_message)
}

/// Panic handler for `CatchPanicLayer`.
///
/// The panic becomes an ordinary handler failure so the pipeline classifies
/// and logs it like any other untyped error.
pub fn catch_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");

    AppError::Panic(message.to_string()).into_response()
}
