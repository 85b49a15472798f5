//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//! The resulting [`Config`] is immutable and shared behind an `Arc`.
//!
//! # Request Pipeline
//!
//! - `NODE_ENV`: `production`, `test` or `development` (default: `development`)
//! - `API_URL`: Public API URL; an `https` scheme enables HTTPS enforcement and HSTS in production
//! - `MAX_REQUEST_BODY_SIZE`: Maximum declared body size in bytes (default: 1 MiB)
//! - `REQUEST_TIMEOUT_MS`: Advisory per-request timeout (default: 30000)
//! - `RATE_LIMIT_WINDOW_MS`: Fixed rate-limit window length (default: 60000)
//! - `RATE_LIMIT_MAX`: Requests allowed per client per window (default: 100)
//!
//! # Security Configuration
//!
//! - `ALLOWED_ORIGINS`: Comma-separated list of allowed CORS origins (default: `*`)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{AppError, AppResult};

/// Deployment environment, read from `NODE_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Production,
    Test,
    #[default]
    Development,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Test => "test",
            Environment::Development => "development",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            "development" => Ok(Environment::Development),
            other => Err(format!(
                "expected one of production, test, development; got '{other}'"
            )),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("expected json or pretty; got '{other}'")),
        }
    }
}

/// MySQL connection settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Maximum pooled connections (default: 10)
    pub max_connections: u32,
    /// How long a ping waits for a pooled connection before failing
    pub acquire_timeout: Duration,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl DatabaseConfig {
    /// Connection target without credentials, safe for logs.
    pub fn describe(&self) -> String {
        format!("mysql://{}@{}:{}/{}", self.user, self.host, self.port, self.name)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "password".to_string(),
            name: "database".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Deployment environment (default: development)
    pub environment: Environment,

    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Public URL of the API (default: "http://localhost:3000")
    pub api_url: String,

    // =========================================================================
    // Request Pipeline Configuration
    // =========================================================================
    /// Maximum declared request body size in bytes (default: 1 MiB)
    pub max_request_body_size: usize,

    /// Advisory per-request timeout (default: 30 seconds)
    pub request_timeout: Duration,

    /// Length of one fixed rate-limit window (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Requests allowed per client key per window (default: 100)
    pub rate_limit_max: u32,

    /// Tracked client keys before an inline eviction sweep runs (default: 100000)
    pub rate_limit_max_keys: usize,

    /// Period of the background stale-window sweep (default: 60 seconds)
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Allowed CORS origins. `["*"]` mirrors any request origin.
    pub allowed_origins: Vec<String>,

    // =========================================================================
    // Database Configuration
    // =========================================================================
    pub database: DatabaseConfig,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format (default: JSON in production, pretty otherwise)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or validate
    /// (e.g., non-numeric PORT, unknown NODE_ENV, zero timeout).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment: Environment = Self::parse_env("NODE_ENV", Environment::Development)?;
        let default_log_format = if environment.is_production() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        };

        let config = Self {
            environment,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Request pipeline
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            request_timeout: Duration::from_millis(Self::parse_env("REQUEST_TIMEOUT_MS", 30_000)?),
            rate_limit_window: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_WINDOW_MS",
                60_000,
            )?),
            rate_limit_max: Self::parse_env("RATE_LIMIT_MAX", 100)?,
            rate_limit_max_keys: Self::parse_env("RATE_LIMIT_MAX_KEYS", 100_000)?,
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                60,
            )?),

            // Security
            allowed_origins: Self::parse_allowed_origins(),

            // Database
            database: DatabaseConfig {
                host: env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: Self::parse_env("DATABASE_PORT", 3306)?,
                user: env::var("DATABASE_USER").unwrap_or_else(|_| "root".to_string()),
                password: env::var("DATABASE_PASSWORD").unwrap_or_else(|_| "password".to_string()),
                name: env::var("DATABASE_NAME").unwrap_or_else(|_| "database".to_string()),
                max_connections: Self::parse_env("DB_POOL_MAX_CONNECTIONS", 10)?,
                acquire_timeout: Duration::from_secs(Self::parse_env(
                    "DATABASE_ACQUIRE_TIMEOUT_SECS",
                    5,
                )?),
            },

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", default_log_format)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        Url::parse(&self.api_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid API_URL: {e}")))?;

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "REQUEST_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_max == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_MAX must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(
                "DB_POOL_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        if self.allowed_origins.is_empty() {
            return Err(AppError::ConfigError(
                "ALLOWED_ORIGINS must list at least one origin or '*'".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the public API URL is served over HTTPS.
    pub fn api_url_is_https(&self) -> bool {
        Url::parse(&self.api_url).is_ok_and(|url| url.scheme() == "https")
    }

    /// HTTPS enforcement and HSTS apply only in production behind an https API URL.
    pub fn https_enforced(&self) -> bool {
        self.environment.is_production() && self.api_url_is_https()
    }

    /// Check if CORS accepts any origin.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_allowed_origins() -> Vec<String> {
        split_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()))
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            host: "0.0.0.0".to_string(),
            port: 3000,
            api_url: "http://localhost:3000".to_string(),
            max_request_body_size: 1024 * 1024,
            request_timeout: Duration::from_millis(30_000),
            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_max: 100,
            rate_limit_max_keys: 100_000,
            rate_limit_sweep_interval: Duration::from_secs(60),
            allowed_origins: vec!["*".to_string()],
            database: DatabaseConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}
