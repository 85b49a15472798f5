//! The request-lifecycle pipeline.
//!
//! [`PipelineLayer`] wraps the router and drives every request through the
//! same sequence:
//!
//! ```text
//! Request
//!    │
//!    ▼
//! on_request      start TimeoutTracker, insert RequestDeadline
//!    │
//!    ▼
//! before_handle   GATES in order, first rejection wins:
//!    │              Https ──▶ 403
//!    │              BodySize ──▶ 413
//!    │              RateLimit ──▶ 429
//!    │              Deadline ──▶ 504
//!    ▼
//! handler
//!    │
//!    ▼
//! after_handle    finish tracker, classify HandlerFailure, security headers
//!    │
//!    ▼
//! Response
//! ```
//!
//! A gate rejection is terminal: neither the handler nor `after_handle` runs
//! for that request, and the tracker is cancelled when it is dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use crate::config::Config;
use crate::error::HandlerFailure;
use crate::metrics;
use crate::middleware::error_handler::{ErrorClassifier, RequestMeta};
use crate::middleware::guard::{HttpsPolicy, Rejection, check_body_size};
use crate::middleware::ip::resolve_client_ip;
use crate::middleware::rate_limit::{FixedWindowLimiter, RateLimitDecision};
use crate::middleware::security_headers::security_headers;
use crate::middleware::timeout::TimeoutTracker;

/// A pre-handle check that can end the request early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Https,
    BodySize,
    RateLimit,
    Deadline,
}

impl Gate {
    pub fn name(&self) -> &'static str {
        match self {
            Gate::Https => "https",
            Gate::BodySize => "body_size",
            Gate::RateLimit => "rate_limit",
            Gate::Deadline => "deadline",
        }
    }
}

/// Gate evaluation order.
pub const GATES: [Gate; 4] = [Gate::Https, Gate::BodySize, Gate::RateLimit, Gate::Deadline];

/// Shared pipeline components, built once at startup.
pub struct Pipeline {
    config: Arc<Config>,
    limiter: FixedWindowLimiter,
    https: HttpsPolicy,
    classifier: ErrorClassifier,
    api_url_is_https: bool,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, limiter: FixedWindowLimiter) -> Self {
        Self {
            https: HttpsPolicy::new(config.https_enforced()),
            classifier: ErrorClassifier::new(config.environment),
            api_url_is_https: config.api_url_is_https(),
            config,
            limiter,
        }
    }

    pub fn limiter(&self) -> &FixedWindowLimiter {
        &self.limiter
    }

    /// Start tracking a request.
    fn on_request<B>(&self, req: &mut Request<B>) -> (RequestMeta, TimeoutTracker) {
        let meta = RequestMeta {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            client_ip: resolve_client_ip(req.headers()).into_owned(),
        };
        let tracker = TimeoutTracker::start(
            meta.method.clone(),
            meta.path.clone(),
            self.config.request_timeout,
        );
        req.extensions_mut().insert(tracker.deadline());
        (meta, tracker)
    }

    /// Run every gate in [`GATES`] order, stopping at the first rejection.
    pub fn before_handle<B>(
        &self,
        req: &Request<B>,
        meta: &RequestMeta,
        tracker: &TimeoutTracker,
    ) -> Result<(), (Gate, Rejection)> {
        for gate in GATES {
            self.run_gate(gate, req, meta, tracker)
                .map_err(|rejection| (gate, rejection))?;
        }
        Ok(())
    }

    fn run_gate<B>(
        &self,
        gate: Gate,
        req: &Request<B>,
        meta: &RequestMeta,
        tracker: &TimeoutTracker,
    ) -> Result<(), Rejection> {
        match gate {
            Gate::Https => self.https.check(req.headers(), req.uri()),
            Gate::BodySize => check_body_size(req.headers(), self.config.max_request_body_size),
            Gate::RateLimit => match self.limiter.check(&meta.client_ip) {
                RateLimitDecision::Allow { .. } => Ok(()),
                RateLimitDecision::Reject { retry_after } => Err(Rejection::TooManyRequests {
                    limit: self.limiter.max_requests(),
                    retry_after,
                }),
            },
            Gate::Deadline if tracker.is_expired() => Err(Rejection::Timeout {
                timeout_ms: tracker.timeout_ms(),
            }),
            Gate::Deadline => Ok(()),
        }
    }

    fn reject(&self, gate: Gate, rejection: Rejection, meta: &RequestMeta) -> Response<Body> {
        metrics::record_gate_rejection(gate.name());
        warn!(
            gate = gate.name(),
            status = rejection.status().as_u16(),
            method = %meta.method,
            path = %meta.path,
            client_ip = %meta.client_ip,
            "Request rejected"
        );
        rejection.into_response()
    }

    /// Classify a handler failure if there is one, then apply security headers.
    pub fn after_handle(&self, mut response: Response<Body>, meta: &RequestMeta) -> Response<Body> {
        if let Some(failure) = response.extensions_mut().remove::<HandlerFailure>() {
            response = self.classifier.respond(failure.error(), meta);
        }

        response.headers_mut().extend(security_headers(
            &meta.path,
            self.config.environment,
            self.api_url_is_https,
        ));
        response
    }
}

/// Tower layer installing the [`Pipeline`].
#[derive(Clone)]
pub struct PipelineLayer {
    pipeline: Arc<Pipeline>,
}

impl PipelineLayer {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

impl<S> Layer<S> for PipelineLayer {
    type Service = PipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PipelineService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PipelineService<S> {
    inner: S,
    pipeline: Arc<Pipeline>,
}

impl<S> Service<Request<Body>> for PipelineService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let started = Instant::now();
        let pipeline = self.pipeline.clone();
        let (meta, tracker) = pipeline.on_request(&mut req);

        if let Err((gate, rejection)) = pipeline.before_handle(&req, &meta, &tracker) {
            let response = pipeline.reject(gate, rejection, &meta);
            record_duration(&meta, &response, started);
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            tracker.finish();

            let response = pipeline.after_handle(response, &meta);
            record_duration(&meta, &response, started);
            Ok(response)
        })
    }
}

fn record_duration(meta: &RequestMeta, response: &Response<Body>, started: Instant) {
    metrics::record_request_duration(
        meta.method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::extract::DefaultBodyLimit;
    use axum::http::{Method, StatusCode, header};
    use axum::routing::get;
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;

    use super::*;
    use crate::config::Environment;
    use crate::error::{AppError, AppResult};
    use crate::extract::Payload;
    use crate::middleware::error_handler::catch_panic;
    use crate::middleware::timeout::RequestDeadline;
    use crate::models::ErrorBody;

    fn pipeline(config: Config) -> Pipeline {
        let limiter = FixedWindowLimiter::new(
            config.rate_limit_window,
            config.rate_limit_max,
            config.rate_limit_max_keys,
        )
        .unwrap();
        Pipeline::new(Arc::new(config), limiter)
    }

    async fn ok() -> &'static str {
        "ok"
    }

    async fn missing() -> AppResult<&'static str> {
        Err(AppError::NotFound("order 42".into()))
    }

    async fn broken() -> AppResult<&'static str> {
        Err(AppError::Unexpected(anyhow::anyhow!("division by zero")))
    }

    async fn panics() -> &'static str {
        panic!("handler exploded")
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        "finished"
    }

    async fn deadline_aware(deadline: axum::Extension<RequestDeadline>) -> String {
        format!("expired={}", deadline.is_expired())
    }

    fn app(config: Config) -> Router {
        Router::new()
            .route("/", get(ok))
            .route("/openapi", get(ok))
            .route("/missing", get(missing))
            .route("/broken", get(broken))
            .route("/panic", get(panics))
            .route("/slow", get(slow))
            .route("/deadline", get(deadline_aware))
            .layer(CatchPanicLayer::custom(catch_panic))
            .layer(PipelineLayer::new(pipeline(config)))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn production_https() -> Config {
        Config {
            environment: Environment::Production,
            api_url: "https://api.example.com".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_gate_order() {
        assert_eq!(
            GATES,
            [Gate::Https, Gate::BodySize, Gate::RateLimit, Gate::Deadline]
        );
    }

    #[tokio::test]
    async fn test_success_gets_security_headers() {
        let response = app(Config::default()).oneshot(get_request("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["content-security-policy"], "default-src 'self'");
        assert!(response.headers().get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn test_docs_path_gets_relaxed_headers() {
        let response = app(Config::default())
            .oneshot(get_request("/openapi"))
            .await
            .unwrap();

        assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");
    }

    #[tokio::test]
    async fn test_handler_error_is_classified() {
        let response = app(Config::default())
            .oneshot(get_request("/missing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.extensions().get::<HandlerFailure>().is_none());

        let body: ErrorBody = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.error, "Resource not found");
        assert_eq!(body.path, "/missing");
    }

    #[tokio::test]
    async fn test_generic_error_in_production_hides_internals() {
        let config = Config {
            environment: Environment::Production,
            ..Config::default()
        };
        let response = app(config).oneshot(get_request("/broken")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("stack").is_none());
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_generic_error_in_development_is_verbose() {
        let response = app(Config::default())
            .oneshot(get_request("/broken"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "division by zero");
        assert!(body["stack"].is_string());
    }

    #[tokio::test]
    async fn test_panic_is_recovered_and_classified() {
        let app = app(Config::default());

        let response = app.clone().oneshot(get_request("/panic")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "handler exploded");

        // The service keeps answering after a panic.
        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_https_gate_in_production() {
        let app = app(production_https());

        let response = app
            .clone()
            .oneshot(get_request("http://api.example.com/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"], "HTTPS required");

        let request = Request::builder()
            .uri("http://api.example.com/")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["strict-transport-security"],
            "max-age=31536000; includeSubDomains; preload"
        );
    }

    #[tokio::test]
    async fn test_body_size_gate() {
        let config = Config {
            max_request_body_size: 16,
            ..Config::default()
        };
        let app = app(config);

        let request = Request::builder()
            .uri("/")
            .header(header::CONTENT_LENGTH, "17")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = body_json(response).await;
        assert_eq!(body["maxSize"], 16);
        assert_eq!(body["actualSize"], 17);

        let request = Request::builder()
            .uri("/")
            .header(header::CONTENT_LENGTH, "16")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit_is_classified_as_413() {
        async fn echo(Payload(body): Payload<serde_json::Value>) -> String {
            body.to_string()
        }

        let config = Config {
            max_request_body_size: 16,
            ..Config::default()
        };
        let app = Router::new()
            .route("/echo", axum::routing::post(echo))
            .layer(DefaultBodyLimit::max(config.max_request_body_size))
            .layer(PipelineLayer::new(pipeline(config)));

        // No Content-Length, so the BodySize gate lets it through.
        let request = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"note":"twenty-six bytes"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        let body = body_json(response).await;
        assert_eq!(body["error"], "Request entity too large");
    }

    #[tokio::test]
    async fn test_rate_limit_gate() {
        let config = Config {
            rate_limit_max: 2,
            ..Config::default()
        };
        let app = app(config);
        let from = |ip: &str| {
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", ip)
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..2 {
            let response = app.clone().oneshot(from("1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(from("1.2.3.4, 10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body = body_json(response).await;
        assert_eq!(body["error"], "Too many requests, please try again later.");

        let response = app.oneshot(from("5.6.7.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_https_gate_runs_before_rate_limit() {
        let config = Config {
            rate_limit_max: 1,
            ..production_https()
        };
        let pipeline = pipeline(config);
        let req = get_request("http://api.example.com/");
        let meta = RequestMeta {
            method: Method::GET,
            path: "/".into(),
            client_ip: "1.2.3.4".into(),
        };
        let tracker = TimeoutTracker::start(Method::GET, "/", Duration::from_secs(30));

        for _ in 0..3 {
            let (gate, _) = pipeline.before_handle(&req, &meta, &tracker).unwrap_err();
            assert_eq!(gate, Gate::Https);
        }
        // Rejected requests never reached the limiter.
        assert_eq!(pipeline.limiter().tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_gate_returns_504() {
        let pipeline = pipeline(Config::default());
        let req = get_request("/");
        let meta = RequestMeta {
            method: Method::GET,
            path: "/".into(),
            client_ip: "1.2.3.4".into(),
        };
        let tracker = TimeoutTracker::start(Method::GET, "/", Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(200)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let (gate, rejection) = pipeline.before_handle(&req, &meta, &tracker).unwrap_err();
        assert_eq!(gate, Gate::Deadline);
        assert_eq!(rejection, Rejection::Timeout { timeout_ms: 100 });

        let response = rejection.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = body_json(response).await;
        assert_eq!(body["timeout"], 100);
        assert_eq!(body["error"], "Request timeout");
    }

    /// In-memory log sink for asserting on emitted warnings.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_still_completes() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        // Current-thread runtime, so the timer task logs through this subscriber too.
        let _guard = tracing::subscriber::set_default(subscriber);

        let config = Config {
            request_timeout: Duration::from_millis(1000),
            ..Config::default()
        };

        let response = app(config).oneshot(get_request("/slow")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"finished");

        let output = logs.contents();
        assert!(output.contains("Request timeout"), "logs: {output}");
        assert!(output.contains("Slow request"), "logs: {output}");
        assert!(output.contains("timeout_ms=1000"), "logs: {output}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_logs_no_timeout_warnings() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let config = Config {
            request_timeout: Duration::from_millis(1000),
            ..Config::default()
        };
        let response = app(config).oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Past the original deadline; the cancelled timer must stay quiet.
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;

        let output = logs.contents();
        assert!(!output.contains("Request timeout"), "logs: {output}");
        assert!(!output.contains("Slow request"), "logs: {output}");
    }

    #[tokio::test]
    async fn test_deadline_is_available_to_handlers() {
        let response = app(Config::default())
            .oneshot(get_request("/deadline"))
            .await
            .unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"expired=false");
    }
}
