//! Security response headers.
//!
//! [`security_headers`] is a pure function of the route path and deployment
//! settings; the pipeline merges its output into every handler response.
//!
//! # Interactive API Docs
//!
//! Paths under `/openapi` serve a documentation UI that loads scripts and
//! styles from public CDNs and may be framed by the same origin, so they get a
//! relaxed CSP and `X-Frame-Options: SAMEORIGIN`.

use axum::http::header::{
    CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::Environment;

pub const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

const STRICT_CSP: &str = "default-src 'self'";

const DOCS_CSP: &str = "default-src 'self' 'unsafe-inline' 'unsafe-eval' https://cdn.jsdelivr.net https://unpkg.com; img-src 'self' data: https:;";

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

const DOCS_PATH_PREFIX: &str = "/openapi";

/// Compute the security headers for a response to `path`.
///
/// HSTS is only emitted in production when the public API URL is https.
pub fn security_headers(path: &str, environment: Environment, api_url_is_https: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(8);

    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY,
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );

    if path.starts_with(DOCS_PATH_PREFIX) {
        headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(DOCS_CSP));
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    } else {
        headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(STRICT_CSP));
    }

    if environment.is_production() && api_url_is_https {
        headers.insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }

    headers
}
