//! Error types for the tenancy layer.

use thiserror::Error;

/// Tenancy operation result type.
pub type Result<T> = std::result::Result<T, TenancyError>;

/// Tenancy errors.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// A multi-tenant table was touched with no active tenant scope.
    #[error("no tenant scope is active")]
    ScopeMissing,

    /// An ownership check found a row belonging to another tenant.
    #[error("tenant access denied for {kind}")]
    AccessDenied { kind: String },

    /// The table is not in the classified catalog.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl TenancyError {
    /// Create an access-denied error for the given row kind.
    pub fn access_denied(kind: impl Into<String>) -> Self {
        Self::AccessDenied { kind: kind.into() }
    }
}
