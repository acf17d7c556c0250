//! Database layer for Mendflow.
//!
//! Provides pool creation over SQLite (sqlx), schema bootstrap, and the
//! `DbValue` dynamic bind type used by the tenant-aware query layer.
//!
//! We use the concrete `SqlitePool` rather than `sqlx::AnyPool` so that
//! `#[derive(FromRow)]` keeps full support for custom types like status
//! enums and `DateTime<Utc>`.

pub mod error;
pub mod pool;
pub mod schema;
pub mod value;

pub use error::{DbError, Result};
pub use pool::{create_pool, DbConfig, DbPool, DbRow};
pub use schema::{ensure_queue_schema, ensure_schema};
pub use value::DbValue;
