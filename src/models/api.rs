use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response for `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

/// Database section of the health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    /// `"ok"` or `"error"`
    pub status: String,
    /// Ping failure message, omitted when healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`
    pub status: String,
    /// ISO-8601 timestamp of the check
    pub timestamp: String,
    /// Process uptime in seconds
    pub uptime: f64,
    pub environment: String,
    pub database: DatabaseHealth,
}

/// JSON body of every classified error response.
///
/// `details` and `stack` are only ever populated outside production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: String,
    pub path: String,
}
