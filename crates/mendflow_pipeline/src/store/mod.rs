//! Storage plane: typed stores over the tenant-aware client.
//!
//! Every store routes through `mendflow_tenancy::TenantClient`, so the
//! isolation discipline applies uniformly: repositories and jobs are
//! tenant-filtered, plans and tenants pass through. The raw pool never
//! appears here outside tests.

pub mod jobs;
pub mod models;
pub mod plans;
pub mod repositories;
pub mod tenants;

use thiserror::Error;

use crate::state::{JobEvent, JobState};

pub use jobs::{JobStore, NewJob};
pub use models::{InstallationStatus, Job, JobTransition, Plan, Repository, Tenant};
pub use plans::{NewPlan, PlanStore};
pub use repositories::{NewRepository, RepositoryStore};
pub use tenants::{NewTenant, TenantDirectory};

/// Storage plane result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage plane errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transition or lookup targeted a nonexistent job id.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A non-job row was missing.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The event is not applicable in the job's current state.
    #[error("invalid transition: {event} is not applicable in state {from}")]
    InvalidTransition { from: JobState, event: JobEvent },

    /// A concurrent transition won the conditional write.
    #[error("transition conflict on job {job_id}: status changed concurrently")]
    TransitionConflict { job_id: String },

    /// Tenancy failure (missing scope, denied access, database).
    #[error(transparent)]
    Tenancy(#[from] mendflow_tenancy::TenancyError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
