//! Fixed-window rate limiting keyed by client IP.
//!
//! # Algorithm
//!
//! Each client key owns one window `(count, started_at)`. On every request:
//!
//! 1. If the key has no window, or `now >= started_at + window`, the window
//!    restarts at `now` with a count of zero.
//! 2. The count is incremented.
//! 3. The request is rejected when the count exceeds `max_requests`.
//!
//! This is deliberately coarse: a client can send `max_requests` at the very
//! end of one window and again at the start of the next.
//!
//! # Concurrency
//!
//! Windows live in a [`DashMap`], so the read-compare-increment for a key runs
//! under that key's shard lock only. Requests for different keys on different
//! shards never contend.
//!
//! # Memory
//!
//! Expired windows are removed by [`FixedWindowLimiter::evict_stale`], which
//! runs periodically from a background task and inline when the number of
//! tracked keys reaches `max_keys`. The inline sweep runs at most once per
//! [`INLINE_SWEEP_INTERVAL`]; between sweeps new keys are admitted without a
//! rescan, so rotating client keys cannot turn every request into a full pass
//! over the map.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimum spacing between capacity-triggered sweeps.
pub const INLINE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Error type for rate limiter configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit max must be greater than 0")]
    ZeroMax,

    #[error("rate limit window must be greater than 0")]
    ZeroWindow,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allow {
        /// Requests left in the current window
        remaining: u32,
    },
    Reject {
        /// Time until the current window ends
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started_at: Instant,
}

impl Window {
    fn start(now: Instant) -> Self {
        Self {
            count: 0,
            started_at: now,
        }
    }
}

struct LimiterInner {
    windows: DashMap<String, Window>,
    window: Duration,
    max_requests: u32,
    max_keys: usize,
    epoch: Instant,
    /// Milliseconds after `epoch` of the last inline sweep, plus one. Zero means never.
    last_inline_sweep: AtomicU64,
}

/// Shared fixed-window counter store.
///
/// Cloning is cheap; all clones share the same windows.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = FixedWindowLimiter::new(Duration::from_secs(60), 100, 100_000)?;
/// if !limiter.check("203.0.113.7").is_allowed() {
///     // respond with 429
/// }
/// ```
#[derive(Clone)]
pub struct FixedWindowLimiter {
    inner: Arc<LimiterInner>,
}

impl FixedWindowLimiter {
    /// Create a limiter allowing `max_requests` per `window` per key.
    ///
    /// `max_keys` is the tracked-key count at which an inline eviction sweep
    /// runs before a new key is admitted.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if `window` or `max_requests` is zero.
    pub fn new(window: Duration, max_requests: u32, max_keys: usize) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::ZeroMax);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            inner: Arc::new(LimiterInner {
                windows: DashMap::new(),
                window,
                max_requests,
                max_keys: max_keys.max(1),
                epoch: Instant::now(),
                last_inline_sweep: AtomicU64::new(0),
            }),
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.inner.max_requests
    }

    /// Count a request for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        if let Some(mut window) = self.inner.windows.get_mut(key) {
            return self.apply(&mut window, now);
        }

        if self.inner.windows.len() >= self.inner.max_keys && self.claim_inline_sweep(now) {
            let evicted = self.evict_stale_at(now);
            if self.inner.windows.len() >= self.inner.max_keys {
                warn!(
                    tracked = self.inner.windows.len(),
                    max_keys = self.inner.max_keys,
                    evicted,
                    "Rate limiter key capacity reached with no stale windows"
                );
            }
        }

        let mut window = self
            .inner
            .windows
            .entry(key.to_owned())
            .or_insert_with(|| Window::start(now));
        self.apply(&mut window, now)
    }

    /// Reserve the next inline sweep slot. Only one caller per interval wins.
    fn claim_inline_sweep(&self, now: Instant) -> bool {
        let since_epoch = now.saturating_duration_since(self.inner.epoch).as_millis();
        let stamp = u64::try_from(since_epoch).unwrap_or(u64::MAX - 1) + 1;
        let interval = INLINE_SWEEP_INTERVAL.as_millis() as u64;

        let last = self.inner.last_inline_sweep.load(Ordering::Acquire);
        if last != 0 && stamp.saturating_sub(last) < interval {
            return false;
        }
        self.inner
            .last_inline_sweep
            .compare_exchange(last, stamp, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn apply(&self, window: &mut Window, now: Instant) -> RateLimitDecision {
        if now >= window.started_at + self.inner.window {
            *window = Window::start(now);
        }

        window.count = window.count.saturating_add(1);

        if window.count > self.inner.max_requests {
            let retry_after = (window.started_at + self.inner.window).saturating_duration_since(now);
            RateLimitDecision::Reject { retry_after }
        } else {
            RateLimitDecision::Allow {
                remaining: self.inner.max_requests - window.count,
            }
        }
    }

    /// Remove windows whose period has fully elapsed. Returns how many were removed.
    pub fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now())
    }

    fn evict_stale_at(&self, now: Instant) -> usize {
        let before = self.inner.windows.len();
        let period = self.inner.window;
        self.inner
            .windows
            .retain(|_, window| now < window.started_at + period);
        let evicted = before.saturating_sub(self.inner.windows.len());

        if evicted > 0 {
            debug!(evicted, remaining = self.inner.windows.len(), "Evicted stale rate limit windows");
        }
        evicted
    }

    /// Number of client keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.inner.windows.len()
    }
}
