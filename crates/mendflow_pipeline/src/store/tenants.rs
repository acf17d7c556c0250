//! Tenant directory.
//!
//! Tenants are created on platform-install webhooks, mutated on status
//! change, soft-deleted on uninstall. The tenants table is not itself
//! multi-tenant (it has no tenant_id column), so these operations pass
//! through the client unfiltered.

use std::sync::Arc;

use chrono::Utc;
use mendflow_db::DbValue;
use mendflow_tenancy::{Filter, TenantClient};
use uuid::Uuid;

use super::models::{InstallationStatus, Tenant};
use super::{Result, StoreError};

const TABLE: &str = "tenants";

/// A tenant to register on installation.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub github_installation_id: i64,
    pub github_account_login: String,
    pub github_account_type: String,
    pub plan_id: String,
}

pub struct TenantDirectory {
    client: Arc<TenantClient>,
}

impl TenantDirectory {
    pub fn new(client: Arc<TenantClient>) -> Self {
        Self { client }
    }

    /// Register a tenant (install webhook). Installation id uniqueness is
    /// enforced by the schema.
    pub async fn create(&self, tenant: NewTenant) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.client
            .insert(
                TABLE,
                vec![
                    ("id", DbValue::Text(id.clone())),
                    (
                        "github_installation_id",
                        DbValue::Integer(tenant.github_installation_id),
                    ),
                    (
                        "github_account_login",
                        DbValue::Text(tenant.github_account_login),
                    ),
                    (
                        "github_account_type",
                        DbValue::Text(tenant.github_account_type),
                    ),
                    ("installed_at", DbValue::Text(now.clone())),
                    (
                        "installation_status",
                        DbValue::Text(InstallationStatus::Pending.as_str().to_string()),
                    ),
                    ("plan_id", DbValue::Text(tenant.plan_id)),
                    ("created_at", DbValue::Text(now.clone())),
                    ("updated_at", DbValue::Text(now)),
                ],
            )
            .await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Tenant> {
        self.client
            .fetch_optional(TABLE, Filter::eq("id", id))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "tenant",
                id: id.to_string(),
            })
    }

    pub async fn get_by_installation(&self, github_installation_id: i64) -> Result<Tenant> {
        self.client
            .fetch_optional(
                TABLE,
                Filter::eq("github_installation_id", github_installation_id),
            )
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "tenant",
                id: github_installation_id.to_string(),
            })
    }

    pub async fn set_status(&self, id: &str, status: InstallationStatus) -> Result<()> {
        let affected = self
            .client
            .update(
                TABLE,
                vec![
                    (
                        "installation_status",
                        DbValue::Text(status.as_str().to_string()),
                    ),
                    ("updated_at", DbValue::Text(Utc::now().to_rfc3339())),
                ],
                Filter::eq("id", id),
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: "tenant",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Move the tenant to a new plan, stamping plan_changed_at.
    pub async fn change_plan(&self, id: &str, plan_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .client
            .update(
                TABLE,
                vec![
                    ("plan_id", DbValue::Text(plan_id.to_string())),
                    ("plan_changed_at", DbValue::Text(now.clone())),
                    ("updated_at", DbValue::Text(now)),
                ],
                Filter::eq("id", id),
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: "tenant",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Soft delete on uninstall: stamp uninstalled_at and suspend. The row
    /// is retained; repositories stay until a hard delete cascades them.
    pub async fn mark_uninstalled(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .client
            .update(
                TABLE,
                vec![
                    ("uninstalled_at", DbValue::Text(now.clone())),
                    (
                        "installation_status",
                        DbValue::Text(InstallationStatus::Suspended.as_str().to_string()),
                    ),
                    ("updated_at", DbValue::Text(now)),
                ],
                Filter::eq("id", id),
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: "tenant",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Hard delete; repositories cascade at the schema level.
    pub async fn delete(&self, id: &str) -> Result<u64> {
        Ok(self.client.delete(TABLE, Filter::eq("id", id)).await?)
    }
}
