//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets/propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers, preflight
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Pipeline     │ ← Gates (403/413/429/504), error classification,
//! └────────┬─────────┘   security headers
//!          ▼
//! ┌──────────────────┐
//! │  Body limit      │ ← Caps bodies buffered by extractors
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Catch panic     │ ← Panics become handler failures
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! CORS sits outside the pipeline so that gate rejections carry CORS headers
//! and browsers can read them.

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, Request};
use axum::routing::get;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::handlers;
use crate::middleware::{Pipeline, PipelineLayer, catch_panic};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let cors = build_cors_layer(&config);
    let pipeline = Pipeline::new(config.clone(), state.limiter.clone());

    info!(
        https_enforced = config.https_enforced(),
        max_body_bytes = config.max_request_body_size,
        timeout_ms = config.request_timeout.as_millis() as u64,
        rate_limit_max = config.rate_limit_max,
        rate_limit_window_ms = config.rate_limit_window.as_millis() as u64,
        "Request pipeline configured"
    );

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .fallback(handlers::not_found)
        // Applied bottom to top: the last layer is the outermost.
        .layer(CatchPanicLayer::custom(catch_panic))
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(PipelineLayer::new(pipeline))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                info_span!(
                    "http_request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id
                )
            }),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Build CORS layer from configuration.
///
/// Credentials are allowed, so `*` cannot be sent literally; instead the
/// request origin is mirrored back.
fn build_cors_layer(config: &Config) -> CorsLayer {
    let allow_origin = if config.allows_any_origin() {
        if config.environment.is_production() {
            warn!("ALLOWED_ORIGINS is '*' in production; any origin may make credentialed requests");
        }
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::database::{BoxFuture, DatabaseError, DatabasePing};

    struct StubDatabase {
        healthy: bool,
    }

    impl DatabasePing for StubDatabase {
        fn ping(&self) -> BoxFuture<'_, Result<(), DatabaseError>> {
            let healthy = self.healthy;
            Box::pin(async move {
                if healthy {
                    Ok(())
                } else {
                    Err(DatabaseError::Unavailable("connect ECONNREFUSED".into()))
                }
            })
        }

        fn close(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    fn router(config: Config, healthy: bool) -> Router {
        let state = AppState::new(config, Arc::new(StubDatabase { healthy })).unwrap();
        build_router(state)
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_root() {
        let response = router(Config::default(), true).oneshot(get("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(json(response).await["message"], "Hello World");
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let request = Request::builder()
            .uri("/")
            .header("x-request-id", "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = router(Config::default(), true).oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "abc-123");
    }

    #[tokio::test]
    async fn test_health_ok() {
        let response = router(Config::default(), true)
            .oneshot(get("/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["environment"], "development");
        assert_eq!(body["database"]["status"], "ok");
        assert!(body["database"].get("error").is_none());
        assert!(body["uptime"].is_number());
    }

    #[tokio::test]
    async fn test_health_degraded_when_ping_fails() {
        let response = router(Config::default(), false)
            .oneshot(get("/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["database"]["status"], "error");
        assert!(body["database"]["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_route_is_classified_not_found() {
        let response = router(Config::default(), true)
            .oneshot(get("/nope"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        let body = json(response).await;
        assert_eq!(body["error"], "Resource not found");
        assert_eq!(body["path"], "/nope");
    }

    #[tokio::test]
    async fn test_cors_mirrors_origin_with_credentials() {
        let request = Request::builder()
            .uri("/")
            .header("origin", "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = router(Config::default(), true).oneshot(request).await.unwrap();

        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://app.example.com"
        );
        assert_eq!(response.headers()["access-control-allow-credentials"], "true");
    }

    #[tokio::test]
    async fn test_cors_rejects_unlisted_origin() {
        let config = Config {
            allowed_origins: vec!["https://app.example.com".to_string()],
            ..Config::default()
        };
        let request = Request::builder()
            .uri("/")
            .header("origin", "https://evil.example.com")
            .body(Body::empty())
            .unwrap();
        let response = router(config, true).oneshot(request).await.unwrap();

        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_rejection_carries_cors_headers() {
        let config = Config {
            rate_limit_max: 1,
            ..Config::default()
        };
        let app = router(config, true);
        let request = || {
            Request::builder()
                .uri("/")
                .header("origin", "https://app.example.com")
                .header("x-real-ip", "9.9.9.9")
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(
            app.clone().oneshot(request()).await.unwrap().status(),
            StatusCode::OK
        );
        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }
}
