//! # Sentinel API
//!
//! An HTTP API backend built on Axum whose every request passes through one
//! explicit lifecycle pipeline:
//!
//! - **Gates**: HTTPS enforcement, declared body-size limit, fixed-window rate limiting,
//!   expired-deadline check
//! - **Timeout tracking**: advisory per-request timer with slow-request warnings and a
//!   cooperative cancellation token for handlers
//! - **Error classification**: one stable JSON error taxonomy, one log line per failure,
//!   verbose in development and terse in production
//! - **Security headers**: CSP, frame options, HSTS and friends on every handler response
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → CORS                                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline (gates → handler → classify → security headers)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (/, /health, fallback)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DatabasePing (MySQL pool via sqlx)                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sentinel_api::{AppState, Config, build_router};
//! use sentinel_api::database::MySqlDatabase;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let database = MySqlDatabase::connect_lazy(&config.database);
//!
//!     let state = AppState::new(config, Arc::new(database))?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Enforce HTTPS and send HSTS:
//! ```bash
//! NODE_ENV=production API_URL=https://api.example.com cargo run
//! ```
//!
//! Tighten rate limiting:
//! ```bash
//! RATE_LIMIT_MAX=20 RATE_LIMIT_WINDOW_MS=10000 cargo run
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use extract::Payload;
pub use routes::build_router;
pub use state::AppState;
