//! Plan store.
//!
//! Plans are shared reference data (no tenant_id column); the tenant client
//! passes them through unfiltered. Creation and mutation belong to the
//! billing subsystem; the core only reads, but tests need to seed.

use std::sync::Arc;

use chrono::Utc;
use mendflow_db::DbValue;
use mendflow_tenancy::{Filter, TenantClient};
use uuid::Uuid;

use super::models::Plan;
use super::{Result, StoreError};

const TABLE: &str = "plans";

/// A plan to seed.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub display_name: String,
    pub max_repos: i64,
    pub max_prs_per_month: i64,
    pub max_tokens_per_month: i64,
    pub max_llm_calls_per_month: i64,
}

pub struct PlanStore {
    client: Arc<TenantClient>,
}

impl PlanStore {
    pub fn new(client: Arc<TenantClient>) -> Self {
        Self { client }
    }

    /// Insert a plan and return its id.
    pub async fn create(&self, plan: NewPlan) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.client
            .insert(
                TABLE,
                vec![
                    ("id", DbValue::Text(id.clone())),
                    ("name", DbValue::Text(plan.name)),
                    ("display_name", DbValue::Text(plan.display_name)),
                    ("max_repos", DbValue::Integer(plan.max_repos)),
                    ("max_prs_per_month", DbValue::Integer(plan.max_prs_per_month)),
                    (
                        "max_tokens_per_month",
                        DbValue::Integer(plan.max_tokens_per_month),
                    ),
                    (
                        "max_llm_calls_per_month",
                        DbValue::Integer(plan.max_llm_calls_per_month),
                    ),
                    ("created_at", DbValue::Text(now.clone())),
                    ("updated_at", DbValue::Text(now)),
                ],
            )
            .await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Plan> {
        self.client
            .fetch_optional(TABLE, Filter::eq("id", id))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "plan",
                id: id.to_string(),
            })
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Plan> {
        self.client
            .fetch_optional(TABLE, Filter::eq("name", name))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "plan",
                id: name.to_string(),
            })
    }

    pub async fn list_active(&self) -> Result<Vec<Plan>> {
        Ok(self
            .client
            .fetch_all(TABLE, Some(Filter::new("is_active = ?", vec![true.into()])))
            .await?)
    }
}
