//! Repository store.
//!
//! Repositories carry a tenant_id column, so every operation here runs
//! under the active tenant scope: reads come back filtered, inserts get the
//! scope's tenant injected, and updates aimed at another tenant's rows
//! affect nothing.

use std::sync::Arc;

use chrono::Utc;
use mendflow_db::DbValue;
use mendflow_tenancy::{Filter, TenantClient};
use uuid::Uuid;

use super::models::Repository;
use super::{Result, StoreError};

const TABLE: &str = "repositories";

/// A repository to start monitoring.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub github_repo_id: i64,
    pub owner: String,
    pub name: String,
}

pub struct RepositoryStore {
    client: Arc<TenantClient>,
}

impl RepositoryStore {
    pub fn new(client: Arc<TenantClient>) -> Self {
        Self { client }
    }

    /// Add a repository under the current tenant and return its id.
    pub async fn add(&self, repo: NewRepository) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let full_name = format!("{}/{}", repo.owner, repo.name);
        self.client
            .insert(
                TABLE,
                vec![
                    ("id", DbValue::Text(id.clone())),
                    ("github_repo_id", DbValue::Integer(repo.github_repo_id)),
                    ("owner", DbValue::Text(repo.owner)),
                    ("name", DbValue::Text(repo.name)),
                    ("full_name", DbValue::Text(full_name)),
                    ("enabled", DbValue::Bool(true)),
                    ("created_at", DbValue::Text(now.clone())),
                    ("updated_at", DbValue::Text(now)),
                ],
            )
            .await?;
        Ok(id)
    }

    /// All repositories of the current tenant.
    pub async fn list(&self) -> Result<Vec<Repository>> {
        Ok(self.client.fetch_all(TABLE, None).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Repository> {
        self.client
            .fetch_optional(TABLE, Filter::eq("id", id))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "repository",
                id: id.to_string(),
            })
    }

    pub async fn get_by_github_id(&self, github_repo_id: i64) -> Result<Repository> {
        self.client
            .fetch_optional(TABLE, Filter::eq("github_repo_id", github_repo_id))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "repository",
                id: github_repo_id.to_string(),
            })
    }

    /// Enable or disable monitoring. Zero affected rows means the id does
    /// not exist under this tenant.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<u64> {
        Ok(self
            .client
            .update(
                TABLE,
                vec![
                    ("enabled", DbValue::Bool(enabled)),
                    ("updated_at", DbValue::Text(Utc::now().to_rfc3339())),
                ],
                Filter::eq("id", id),
            )
            .await?)
    }

    pub async fn set_policy_overrides(
        &self,
        id: &str,
        overrides: serde_json::Value,
    ) -> Result<u64> {
        Ok(self
            .client
            .update(
                TABLE,
                vec![
                    ("policy_overrides", DbValue::Json(overrides)),
                    ("updated_at", DbValue::Text(Utc::now().to_rfc3339())),
                ],
                Filter::eq("id", id),
            )
            .await?)
    }

    pub async fn remove(&self, id: &str) -> Result<u64> {
        Ok(self.client.delete(TABLE, Filter::eq("id", id)).await?)
    }
}
