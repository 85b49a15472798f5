//! Health endpoint.
//!
//! `GET /health` pings the database through the pool on every call:
//!
//! - ping ok → 200, `status: "ok"`
//! - ping failed → 503, `status: "degraded"`, `database.error` set
//!
//! The 503 is the health report itself, not a handler failure, so it bypasses
//! error classification.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{SecondsFormat, Utc};
use tracing::{instrument, warn};

use crate::metrics;
use crate::models::{DatabaseHealth, HealthResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "ok",
///   "timestamp": "2024-01-15T10:30:00.000Z",
///   "uptime": 3600.25,
///   "environment": "production",
///   "database": { "status": "ok" }
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ping = state.database.ping().await;
    metrics::set_database_status(ping.is_ok());

    let (status_code, status, database) = match ping {
        Ok(()) => (
            StatusCode::OK,
            "ok",
            DatabaseHealth {
                status: "ok".to_string(),
                error: None,
            },
        ),
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "degraded",
                DatabaseHealth {
                    status: "error".to_string(),
                    error: Some(e.to_string()),
                },
            )
        }
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            uptime: state.uptime_seconds(),
            environment: state.config.environment.to_string(),
            database,
        }),
    )
}
