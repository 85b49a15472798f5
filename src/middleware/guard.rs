//! Stateless pre-handle checks and the rejection responses gates produce.
//!
//! # HTTPS Enforcement
//!
//! Active only when the service runs in production behind an `https` API URL.
//! A request is compliant when `X-Forwarded-Proto` is `https` (TLS terminated
//! at a proxy) or the request URI itself carries the `https` scheme.
//!
//! # Body Size Validation
//!
//! Checks the declared `Content-Length` only. Requests without a parseable
//! length pass through; buffered extractors are separately capped by
//! `DefaultBodyLimit`.

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub const HTTPS_REQUIRED_MESSAGE: &str =
    "This API requires HTTPS. Please use HTTPS to access this endpoint.";

pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests, please try again later.";

/// HTTPS enforcement settings, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpsPolicy {
    enforced: bool,
}

impl HttpsPolicy {
    pub fn new(enforced: bool) -> Self {
        Self { enforced }
    }

    /// Check a request against the policy.
    pub fn check(&self, headers: &HeaderMap, uri: &Uri) -> Result<(), Rejection> {
        if !self.enforced || is_https_request(headers, uri) {
            return Ok(());
        }
        Err(Rejection::HttpsRequired)
    }
}

fn is_https_request(headers: &HeaderMap, uri: &Uri) -> bool {
    let forwarded_https = headers
        .get("x-forwarded-proto")
        .is_some_and(|v| v.as_bytes() == b"https");
    forwarded_https || uri.scheme_str() == Some("https")
}

/// Reject requests whose declared `Content-Length` exceeds `max_size`.
///
/// A length equal to the limit is accepted.
pub fn check_body_size(headers: &HeaderMap, max_size: usize) -> Result<(), Rejection> {
    let Some(actual_size) = declared_content_length(headers) else {
        return Ok(());
    };

    if actual_size > max_size as u64 {
        return Err(Rejection::PayloadTooLarge {
            max_size,
            actual_size,
        });
    }
    Ok(())
}

/// Parse `Content-Length` the lenient way: leading digits after optional
/// whitespace, anything after them ignored.
fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::CONTENT_LENGTH)?.to_str().ok()?.trim_start();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let digits = value.get(..digits_end)?;
    if digits.is_empty() {
        return None;
    }
    // Overflowing lengths are certainly over any configured limit.
    Some(digits.parse().unwrap_or(u64::MAX))
}

/// Terminal response produced by a pipeline gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    HttpsRequired,
    PayloadTooLarge { max_size: usize, actual_size: u64 },
    TooManyRequests { limit: u32, retry_after: Duration },
    Timeout { timeout_ms: u64 },
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::HttpsRequired => StatusCode::FORBIDDEN,
            Rejection::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Rejection::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct ErrorMessageBody {
    error: &'static str,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayloadTooLargeBody {
    error: &'static str,
    message: String,
    max_size: usize,
    actual_size: u64,
}

#[derive(Serialize)]
struct TooManyRequestsBody {
    error: &'static str,
}

#[derive(Serialize)]
struct TimeoutBody {
    error: &'static str,
    message: String,
    timeout: u64,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Rejection::HttpsRequired => (
                status,
                Json(ErrorMessageBody {
                    error: "HTTPS required",
                    message: HTTPS_REQUIRED_MESSAGE,
                }),
            )
                .into_response(),
            Rejection::PayloadTooLarge {
                max_size,
                actual_size,
            } => (
                status,
                Json(PayloadTooLargeBody {
                    error: "Request entity too large",
                    message: format!(
                        "Request body size ({actual_size} bytes) exceeds maximum allowed size ({max_size} bytes)"
                    ),
                    max_size,
                    actual_size,
                }),
            )
                .into_response(),
            Rejection::TooManyRequests { limit, retry_after } => {
                // Round up so clients never retry inside the window.
                let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let mut response = (
                    status,
                    Json(TooManyRequestsBody {
                        error: TOO_MANY_REQUESTS_MESSAGE,
                    }),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_secs.max(1)));
                headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
                headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
                response
            }
            Rejection::Timeout { timeout_ms } => (
                status,
                Json(TimeoutBody {
                    error: "Request timeout",
                    message: format!(
                        "The request took longer than {timeout_ms}ms to complete. Please try again or contact support if the problem persists."
                    ),
                    timeout: timeout_ms,
                }),
            )
                .into_response(),
        }
    }
}
