//! Per-request timeout tracking.
//!
//! Every request gets a [`TimeoutTracker`] when it enters the pipeline. The
//! tracker runs a one-shot timer on its own task:
//!
//! ```text
//! Running ──timer fires──▶ Expired   (flag set, deadline cancelled, warning logged)
//!    │
//!    └──finish() / drop──▶ Completed (timer cancelled, slow request logged)
//! ```
//!
//! # Advisory, Not Preemptive
//!
//! The timer never aborts the handler and never sends a response by itself.
//! The pipeline consults [`TimeoutTracker::is_expired`] once before the
//! handler runs and answers 504 if the timer already fired. After that the
//! handler always runs to completion.
//!
//! Handlers that want real deadline enforcement can extract the
//! [`RequestDeadline`] from the request extensions and select on it at I/O
//! boundaries:
//!
//! ```rust,ignore
//! async fn report(Extension(deadline): Extension<RequestDeadline>) -> AppResult<Json<Report>> {
//!     tokio::select! {
//!         report = build_report() => Ok(Json(report?)),
//!         _ = deadline.expired() => Err(AppError::ServiceUnavailable("report timed out".into())),
//!     }
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::http::Method;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics;

/// Share of the timeout after which a completed request counts as slow.
pub const SLOW_REQUEST_RATIO: f64 = 0.8;

/// Cooperative cancellation signal for one request.
///
/// Inserted into request extensions by the pipeline; cancelled when the
/// request's timer fires.
#[derive(Debug, Clone)]
pub struct RequestDeadline {
    token: CancellationToken,
    deadline: Instant,
}

impl RequestDeadline {
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the request has exceeded its timeout.
    pub async fn expired(&self) {
        self.token.cancelled().await;
    }

    /// Time left before the timer fires.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Timer state for one in-flight request.
#[derive(Debug)]
pub struct TimeoutTracker {
    method: Method,
    path: String,
    timeout: Duration,
    started_at: Instant,
    expired: Arc<AtomicBool>,
    deadline: CancellationToken,
    timer: CancellationToken,
}

impl TimeoutTracker {
    /// Record the start time and arm the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(method: Method, path: impl Into<String>, timeout: Duration) -> Self {
        let tracker = Self {
            method,
            path: path.into(),
            timeout,
            started_at: Instant::now(),
            expired: Arc::new(AtomicBool::new(false)),
            deadline: CancellationToken::new(),
            timer: CancellationToken::new(),
        };
        tracker.spawn_timer();
        tracker
    }

    fn spawn_timer(&self) {
        let expired = self.expired.clone();
        let deadline = self.deadline.clone();
        let timer = self.timer.clone();
        let method = self.method.clone();
        let path = self.path.clone();
        let timeout = self.timeout;
        let started_at = self.started_at;

        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = timer.cancelled() => {}
                _ = tokio::time::sleep_until(started_at + timeout) => {
                    expired.store(true, Ordering::Release);
                    deadline.cancel();
                    metrics::record_request_timeout();
                    warn!(
                        method = %method,
                        path = %path,
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timeout"
                    );
                }
            }
        });
    }

    /// Whether the timer has fired.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Handle for the request extensions.
    pub fn deadline(&self) -> RequestDeadline {
        RequestDeadline {
            token: self.deadline.clone(),
            deadline: self.started_at + self.timeout,
        }
    }

    /// Cancel the timer and report slow completion. Returns the elapsed time.
    ///
    /// Safe to call after the timer has fired.
    pub fn finish(&self) -> Duration {
        self.timer.cancel();
        let elapsed = self.elapsed();

        if is_slow(elapsed, self.timeout) {
            metrics::record_slow_request();
            warn!(
                method = %self.method,
                path = %self.path,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.timeout_ms(),
                "Slow request"
            );
        }
        elapsed
    }
}

impl Drop for TimeoutTracker {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}

fn is_slow(elapsed: Duration, timeout: Duration) -> bool {
    elapsed.as_secs_f64() > timeout.as_secs_f64() * SLOW_REQUEST_RATIO
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn settle() {
        // Let the timer task observe the advanced clock.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_slow_threshold() {
        let timeout = Duration::from_millis(1000);
        assert!(!is_slow(Duration::from_millis(800), timeout));
        assert!(is_slow(Duration::from_millis(801), timeout));
        assert!(is_slow(Duration::from_millis(1500), timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_expired_before_timeout() {
        let tracker = TimeoutTracker::start(Method::GET, "/", Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;

        assert!(!tracker.is_expired());
        assert!(!tracker.deadline().is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_timeout() {
        let tracker = TimeoutTracker::start(Method::POST, "/orders", Duration::from_secs(30));
        let deadline = tracker.deadline();

        tokio::time::advance(Duration::from_secs(31)).await;
        settle().await;

        assert!(tracker.is_expired());
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_cancels_timer() {
        let tracker = TimeoutTracker::start(Method::GET, "/", Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(1)).await;
        let elapsed = tracker.finish();
        assert_eq!(elapsed, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(!tracker.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_after_expiry_is_harmless() {
        let tracker = TimeoutTracker::start(Method::GET, "/", Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert!(tracker.is_expired());

        assert_eq!(tracker.finish(), Duration::from_millis(150));
        assert!(tracker.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_future_resolves_on_expiry() {
        let tracker = TimeoutTracker::start(Method::GET, "/", Duration::from_secs(5));
        let deadline = tracker.deadline();

        let waited = tokio::time::timeout(Duration::from_secs(10), deadline.expired()).await;
        assert!(waited.is_ok());
        assert!(tracker.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let tracker = TimeoutTracker::start(Method::GET, "/", Duration::from_secs(1));
        let deadline = tracker.deadline();
        drop(tracker);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(!deadline.is_expired());
    }
}
