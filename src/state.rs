//! Shared application state for Axum handlers.
//!
//! Holds the immutable configuration, the database collaborator and the rate
//! limiter shared by every request.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken` for proper lifecycle management. Call `shutdown()`
//! after the HTTP server has drained to stop them and close the database pool.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::database::DatabasePing;
use crate::metrics;
use crate::middleware::{FixedWindowLimiter, RateLimitError};

/// Shared application state.
///
/// Cloned into every handler; all fields are reference-counted.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, database)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Database liveness probe
    pub database: Arc<dyn DatabasePing>,
    /// Per-client fixed-window rate limiter
    pub limiter: FixedWindowLimiter,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create the state and spawn the rate-limit sweep task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if the rate-limit window or maximum is zero.
    pub fn new(config: Config, database: Arc<dyn DatabasePing>) -> Result<Self, RateLimitError> {
        let limiter = FixedWindowLimiter::new(
            config.rate_limit_window,
            config.rate_limit_max,
            config.rate_limit_max_keys,
        )?;

        let state = Self {
            config: Arc::new(config),
            database,
            limiter,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_rate_limit_sweep_task();

        Ok(state)
    }

    /// Spawn the background task that evicts expired rate-limit windows.
    fn spawn_rate_limit_sweep_task(&self) {
        let limiter = self.limiter.clone();
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_stale();
                        let tracked = limiter.tracked_keys();
                        metrics::set_rate_limit_tracked_keys(tracked);
                        trace!(evicted, tracked, "Rate limit sweep complete");
                    }
                }
            }

            debug!("Rate limit sweep task shutting down");
        });
    }

    /// Stop background tasks, then close the database pool.
    ///
    /// Call only after the HTTP server has stopped accepting and drained
    /// in-flight requests.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");

        self.database.close().await;
    }

    /// Application uptime in seconds, with sub-second precision.
    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
