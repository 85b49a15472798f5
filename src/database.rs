//! Database collaborator used by the health endpoint and shutdown sequence.
//!
//! The pipeline only needs two things from the database: a liveness ping and
//! a way to close the pool once the HTTP server has drained. Schema,
//! migrations and queries live elsewhere.

use std::future::Future;
use std::pin::Pin;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Connection;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;

/// Boxed future returned by [`DatabasePing`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("{0}")]
    Unavailable(String),
}

impl DatabaseError {
    /// Whether the failure means the database could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            DatabaseError::Sqlx(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Tls(_)
            ),
            DatabaseError::Unavailable(_) => true,
        }
    }
}

/// Liveness probe and lifecycle hook for the backing database.
pub trait DatabasePing: Send + Sync + 'static {
    /// Round-trip to the database through the pool.
    fn ping(&self) -> BoxFuture<'_, Result<(), DatabaseError>>;

    /// Close the pool. Called once during shutdown.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// MySQL connection pool.
///
/// The pool connects lazily, so construction never blocks on the network.
#[derive(Debug, Clone)]
pub struct MySqlDatabase {
    pool: MySqlPool,
}

impl MySqlDatabase {
    #[instrument(skip_all, fields(database = %config.describe()))]
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy_with(options);

        info!(
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

impl DatabasePing for MySqlDatabase {
    fn ping(&self) -> BoxFuture<'_, Result<(), DatabaseError>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pool.close().await;
            info!("Database connection pool closed");
        })
    }
}
