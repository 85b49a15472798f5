//! Prometheus metrics for application observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are safe to call before (or without) initialization;
//! the `metrics` facade drops values when no recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `api_gate_rejections_total` - Requests stopped by a pipeline gate (label: gate)
//! - `api_errors_total` - Classified handler failures (label: status)
//! - `api_request_timeouts_total` - Requests whose timer fired
//! - `api_slow_requests_total` - Requests that finished past 80% of the timeout
//!
//! ## Histograms
//! - `api_request_duration_seconds` - Pipeline duration (labels: method, status)
//!
//! ## Gauges
//! - `api_rate_limit_tracked_keys` - Client keys held by the rate limiter
//! - `api_database_status` - Last database ping result (1 = up, 0 = down)

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const GATE_REJECTIONS_TOTAL: &str = "api_gate_rejections_total";
    pub const ERRORS_TOTAL: &str = "api_errors_total";
    pub const REQUEST_TIMEOUTS_TOTAL: &str = "api_request_timeouts_total";
    pub const SLOW_REQUESTS_TOTAL: &str = "api_slow_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "api_request_duration_seconds";
    pub const RATE_LIMIT_TRACKED_KEYS: &str = "api_rate_limit_tracked_keys";
    pub const DATABASE_STATUS: &str = "api_database_status";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is taken
/// or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::GATE_REJECTIONS_TOTAL,
        "Total number of requests rejected by a pipeline gate"
    );
    describe_counter!(
        names::ERRORS_TOTAL,
        "Total number of handler failures classified into an error response"
    );
    describe_counter!(
        names::REQUEST_TIMEOUTS_TOTAL,
        "Total number of requests that exceeded the request timeout"
    );
    describe_counter!(
        names::SLOW_REQUESTS_TOTAL,
        "Total number of requests that completed after 80% of the request timeout"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_TRACKED_KEYS,
        "Number of client keys tracked by the rate limiter"
    );
    describe_gauge!(
        names::DATABASE_STATUS,
        "Database status from the last ping (1 = up, 0 = down)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a request stopped by a gate.
pub fn record_gate_rejection(gate: &'static str) {
    counter!(names::GATE_REJECTIONS_TOTAL, "gate" => gate).increment(1);
}

/// Record a classified handler failure.
pub fn record_error(status: u16) {
    counter!(names::ERRORS_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn record_request_timeout() {
    counter!(names::REQUEST_TIMEOUTS_TOTAL).increment(1);
}

pub fn record_slow_request() {
    counter!(names::SLOW_REQUESTS_TOTAL).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record HTTP request duration.
pub fn record_request_duration(method: &str, status: u16, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

pub fn set_rate_limit_tracked_keys(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_KEYS).set(count as f64);
}

/// Update database status gauge.
pub fn set_database_status(up: bool) {
    gauge!(names::DATABASE_STATUS).set(if up { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed recorder must be a no-op.

    #[test]
    fn test_record_gate_rejection() {
        record_gate_rejection("rate_limit");
    }

    #[test]
    fn test_record_error() {
        record_error(503);
    }

    #[test]
    fn test_record_request_duration() {
        record_request_duration("GET", 200, 0.1);
    }

    #[test]
    fn test_gauges() {
        set_rate_limit_tracked_keys(42);
        set_database_status(true);
        set_database_status(false);
    }
}
