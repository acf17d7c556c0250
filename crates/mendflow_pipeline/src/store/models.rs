//! Database models for the Mendflow storage plane.
//!
//! Uses derive macros for FromRow to map database rows to structs. JSON
//! columns stay `String` in the row structs; parse helpers live next to the
//! types that need them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::state::JobState;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallationStatus {
    Pending,
    Active,
    Suspended,
}

impl InstallationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationStatus::Pending => "PENDING",
            InstallationStatus::Active => "ACTIVE",
            InstallationStatus::Suspended => "SUSPENDED",
        }
    }
}

// ============================================================================
// Billing
// ============================================================================

/// Subscription descriptor. Owned by the billing subsystem; immutable from
/// the core's perspective.
#[derive(Debug, Clone, FromRow)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub price_usd: f64,
    pub billing_interval: String,
    pub max_repos: i64,
    pub max_prs_per_month: i64,
    pub max_tokens_per_month: i64,
    pub max_llm_calls_per_month: i64,
    pub features: String, // JSON
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Tenancy
// ============================================================================

/// One external-platform installation; the isolation boundary.
#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub id: String,
    pub github_installation_id: i64,
    pub github_account_login: String,
    pub github_account_type: String,
    pub installed_at: DateTime<Utc>,
    pub uninstalled_at: Option<DateTime<Utc>>,
    pub settings: String, // JSON
    pub installation_status: InstallationStatus,
    pub plan_id: String,
    pub plan_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A monitored repository, scoped to exactly one tenant.
#[derive(Debug, Clone, FromRow)]
pub struct Repository {
    pub id: String,
    pub tenant_id: String,
    pub github_repo_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub enabled: bool,
    pub policy_overrides: String, // JSON
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Jobs
// ============================================================================

/// The unit of orchestration. Mutated exclusively through the state
/// machine; never deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub repository_id: String,
    pub status: JobState,
    pub metadata: String, // JSON: issue details, stage results, error detail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Parse the metadata column; an unreadable document degrades to `{}`.
    pub fn metadata_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.metadata)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

/// One row of the append-only transition history.
#[derive(Debug, Clone, FromRow)]
pub struct JobTransition {
    pub id: i64,
    pub job_id: String,
    pub tenant_id: String,
    pub from_status: JobState,
    pub event: crate::state::JobEvent,
    pub to_status: JobState,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installation_status_serialization() {
        assert_eq!(
            serde_json::to_string(&InstallationStatus::Active).unwrap(),
            "\"ACTIVE\""
        );
        assert_eq!(
            serde_json::to_string(&InstallationStatus::Pending).unwrap(),
            "\"PENDING\""
        );
    }

    #[test]
    fn test_job_metadata_degrades_to_empty_object() {
        let job = Job {
            id: "j1".to_string(),
            tenant_id: "t1".to_string(),
            repository_id: "r1".to_string(),
            status: JobState::Queued,
            metadata: "not json".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(job.metadata_json().as_object().unwrap().is_empty());
    }
}
