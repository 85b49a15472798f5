//! The request-lifecycle middleware pipeline.
//!
//! - **Client address**: best-effort client IP from proxy headers
//! - **Rate Limiting**: fixed-window counter per client IP
//! - **Request guard**: HTTPS enforcement and declared body-size validation
//! - **Timeout tracking**: per-request advisory timer with a cooperative deadline
//! - **Security headers**: computed from route path and deployment settings
//! - **Error handling**: classification of handler failures into public responses
//!
//! # Architecture
//!
//! ```text
//! Request → Pipeline ─┬─ gates: HTTPS → body size → rate limit → deadline
//!                     │             ↓           ↓            ↓          ↓
//!                     │            403         413          429        504
//!                     └─ handler → classify failure → security headers → Response
//! ```
//!
//! # Security Considerations
//!
//! - Client IPs come from proxy headers; deploy behind a proxy that overwrites them
//! - Error bodies carry stack traces and validation details only outside production
//! - HSTS is sent only in production when the public API URL is https

pub mod error_handler;
pub mod guard;
pub mod ip;
pub mod pipeline;
pub mod rate_limit;
pub mod security_headers;
pub mod timeout;

pub use error_handler::{ErrorClassifier, ErrorDescriptor, RequestMeta, catch_panic};
pub use guard::{HttpsPolicy, Rejection, check_body_size};
pub use ip::{UNKNOWN_IP, resolve_client_ip};
pub use pipeline::{GATES, Gate, Pipeline, PipelineLayer};
pub use rate_limit::{FixedWindowLimiter, RateLimitDecision, RateLimitError};
pub use security_headers::security_headers;
pub use timeout::{RequestDeadline, TimeoutTracker};
