//! Database pool creation.
//!
//! The core takes an opened pool from its embedder; this module is the one
//! place that knows how to open one. Concrete `SqlitePool` (not
//! `sqlx::AnyPool`) keeps `#[derive(FromRow)]` working with enums and
//! `DateTime<Utc>`.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use tracing::info;

use crate::error::{DbError, Result};

/// Database pool type alias.
pub type DbPool = sqlx::SqlitePool;

/// Database row type for dynamically-composed queries.
pub type DbRow = sqlx::sqlite::SqliteRow;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum connections in the pool
    pub max_connections: u32,
}

impl DbConfig {
    /// Create a file-backed SQLite configuration.
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref()),
            max_connections: 5,
        }
    }

    /// Create an in-memory SQLite configuration (for testing).
    ///
    /// A single connection: each `:memory:` connection is its own database,
    /// so the pool must never open a second one.
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    /// Set maximum connections.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Create a database pool from configuration.
///
/// Pragmas ride on the connect options so every pooled connection gets
/// them: WAL for concurrent access, NORMAL sync, and foreign keys on -
/// referential integrity is load-bearing (tenants -> plans, repositories
/// -> tenants with cascade).
pub async fn create_pool(config: DbConfig) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(DbError::Sqlx)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(DbError::Sqlx)?;

    info!(url = %config.url, "Connected to SQLite database");
    Ok(pool)
}
