//! Tenant isolation for Mendflow.
//!
//! Two pieces:
//!
//! - [`scope`]: a task-local tenant scope. Wrap a logical operation in
//!   [`scope::run_with_scope`] and the tenant id is visible across every
//!   await inside it, without being passed as a parameter. Concurrent
//!   operations under other scopes never observe it.
//! - [`client::TenantClient`]: the only legitimate path to tables that carry
//!   a `tenant_id` column. Reads are filtered, inserts overridden,
//!   updates/deletes constrained - all with the current scope's tenant id.
//!   Outside a scope, operations on those tables fail before any SQL is
//!   sent.
//!
//! The raw pool stays available for migrations, tenant lifecycle and tests;
//! everything else goes through the client.

pub mod client;
pub mod error;
pub mod scope;

pub use client::{verify_ownership, Filter, TenantClient};
pub use error::{Result, TenancyError};
pub use scope::{current, current_tenant_id, has_scope, run_with_scope, TenantScope};
