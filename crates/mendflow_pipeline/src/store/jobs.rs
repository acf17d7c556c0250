//! Job store and the transition engine.
//!
//! The state machine itself is pure (`crate::state`); this is the single
//! place it is bound to storage. A transition reads the current status,
//! computes the next one, and performs a conditional
//! `UPDATE ... WHERE status = expected`. Concurrent transitions on the same
//! job serialize on that condition: only one wins, the loser observes zero
//! affected rows and never half-writes.
//!
//! Jobs carry tenant_id, so everything here runs under the active scope.

use std::sync::Arc;

use chrono::Utc;
use mendflow_db::DbValue;
use mendflow_tenancy::{Filter, TenantClient};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::models::{Job, JobTransition};
use super::{Result, StoreError};
use crate::state::{next_state, JobEvent, JobState};

const TABLE: &str = "jobs";
const HISTORY_TABLE: &str = "job_transitions";

/// Everything needed to open a job for an issue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub repository_id: String,
    pub issue_number: i64,
    pub issue_title: String,
    pub issue_body: String,
    pub issue_url: String,
}

pub struct JobStore {
    client: Arc<TenantClient>,
}

impl JobStore {
    pub fn new(client: Arc<TenantClient>) -> Self {
        Self { client }
    }

    /// Insert a job row in QUEUED with the issue details in metadata.
    /// Returns the fresh job id.
    pub async fn create(&self, new: &NewJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let metadata = json!({
            "repositoryId": new.repository_id,
            "issueNumber": new.issue_number,
            "issueTitle": new.issue_title,
            "issueBody": new.issue_body,
            "issueUrl": new.issue_url,
        });

        self.client
            .insert(
                TABLE,
                vec![
                    ("id", DbValue::Text(id.clone())),
                    ("repository_id", DbValue::Text(new.repository_id.clone())),
                    ("status", DbValue::Text(JobState::Queued.as_str().to_string())),
                    ("metadata", DbValue::Json(metadata)),
                    ("created_at", DbValue::Text(now.clone())),
                    ("updated_at", DbValue::Text(now)),
                ],
            )
            .await?;
        Ok(id)
    }

    /// Fetch a job visible to the current tenant.
    pub async fn get(&self, job_id: &str) -> Result<Job> {
        self.client
            .fetch_optional(TABLE, Filter::eq("id", job_id))
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    /// The job's current status.
    pub async fn current_state(&self, job_id: &str) -> Result<JobState> {
        Ok(self.get(job_id).await?.status)
    }

    /// Apply `event` to the job, atomically.
    ///
    /// On a failure event, `error_details` and the failing stage land in
    /// metadata as `errorDetails` / `failedAt`. Returns the new state, or
    /// `InvalidTransition` when the event is not applicable, or
    /// `TransitionConflict` when a concurrent transition won the write.
    pub async fn transition(
        &self,
        job_id: &str,
        event: JobEvent,
        error_details: Option<&str>,
    ) -> Result<JobState> {
        let job = self.get(job_id).await?;
        let from = job.status;
        let Some(to) = next_state(from, event) else {
            return Err(StoreError::InvalidTransition { from, event });
        };

        let mut metadata = job.metadata_json();
        if !metadata.is_object() {
            metadata = json!({});
        }
        if let Some(details) = error_details {
            metadata["errorDetails"] = json!(details);
            metadata["failedAt"] = json!(from.as_str());
        }

        let affected = self
            .client
            .update(
                TABLE,
                vec![
                    ("status", DbValue::Text(to.as_str().to_string())),
                    ("metadata", DbValue::Json(metadata)),
                    ("updated_at", DbValue::Text(Utc::now().to_rfc3339())),
                ],
                Filter::eq("id", job_id).and(Filter::eq("status", from.as_str())),
            )
            .await?;
        if affected == 0 {
            return Err(StoreError::TransitionConflict {
                job_id: job_id.to_string(),
            });
        }

        // Append-only history; tenant_id is injected by the client.
        self.client
            .insert(
                HISTORY_TABLE,
                vec![
                    ("job_id", DbValue::Text(job_id.to_string())),
                    ("from_status", DbValue::Text(from.as_str().to_string())),
                    ("event", DbValue::Text(event.as_str().to_string())),
                    ("to_status", DbValue::Text(to.as_str().to_string())),
                    ("recorded_at", DbValue::Text(Utc::now().to_rfc3339())),
                ],
            )
            .await?;

        info!(job_id, %from, %event, %to, "job transitioned");
        Ok(to)
    }

    /// Shallow-merge a patch into the job's metadata.
    pub async fn merge_metadata(&self, job_id: &str, patch: serde_json::Value) -> Result<()> {
        let job = self.get(job_id).await?;
        let mut metadata = job.metadata_json();
        if let (Some(target), Some(source)) = (metadata.as_object_mut(), patch.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        self.client
            .update(
                TABLE,
                vec![
                    ("metadata", DbValue::Json(metadata)),
                    ("updated_at", DbValue::Text(Utc::now().to_rfc3339())),
                ],
                Filter::eq("id", job_id),
            )
            .await?;
        Ok(())
    }

    /// The job's transition history, oldest first.
    pub async fn history(&self, job_id: &str) -> Result<Vec<JobTransition>> {
        let mut rows: Vec<JobTransition> = self
            .client
            .fetch_all(HISTORY_TABLE, Some(Filter::eq("job_id", job_id)))
            .await?;
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mendflow_db::{create_pool, ensure_schema, DbConfig};
    use mendflow_tenancy::{run_with_scope, TenantScope};

    async fn setup() -> (Arc<TenantClient>, JobStore) {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO plans (id, name, display_name, max_repos, max_prs_per_month,
               max_tokens_per_month, max_llm_calls_per_month, created_at, updated_at)
               VALUES ('plan-1', 'test-plan', 'Test', 5, 50, 1000000, 500, ?, ?)"#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"INSERT INTO tenants (id, github_installation_id, github_account_login,
               github_account_type, installed_at, installation_status, plan_id, created_at, updated_at)
               VALUES ('tenant-a', 12345, 'tenant-a', 'Organization', ?, 'ACTIVE', 'plan-1', ?, ?)"#,
        )
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"INSERT INTO repositories (id, tenant_id, github_repo_id, owner, name, full_name,
               created_at, updated_at)
               VALUES ('repo-1', 'tenant-a', 1001, 'acme', 'web', 'acme/web', ?, ?)"#,
        )
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        let client = Arc::new(TenantClient::new(pool).await.unwrap());
        let store = JobStore::new(client.clone());
        (client, store)
    }

    fn new_job() -> NewJob {
        NewJob {
            repository_id: "repo-1".to_string(),
            issue_number: 123,
            issue_title: "Test Issue".to_string(),
            issue_body: "Something is broken".to_string(),
            issue_url: "https://example.test/acme/web/issues/123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_client, store) = setup().await;
        run_with_scope(TenantScope::new("tenant-a"), async {
            let job_id = store.create(&new_job()).await.unwrap();
            let job = store.get(&job_id).await.unwrap();
            assert_eq!(job.status, JobState::Queued);
            assert_eq!(job.tenant_id, "tenant-a");
            assert_eq!(job.metadata_json()["issueNumber"], 123);
        })
        .await;
    }

    #[tokio::test]
    async fn test_transition_follows_pure_machine() {
        let (_client, store) = setup().await;
        run_with_scope(TenantScope::new("tenant-a"), async {
            let job_id = store.create(&new_job()).await.unwrap();

            let state = store
                .transition(&job_id, JobEvent::StartPlanning, None)
                .await
                .unwrap();
            assert_eq!(state, JobState::Planning);
            assert_eq!(
                store.current_state(&job_id).await.unwrap(),
                JobState::Planning
            );
        })
        .await;
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let (_client, store) = setup().await;
        run_with_scope(TenantScope::new("tenant-a"), async {
            let job_id = store.create(&new_job()).await.unwrap();

            let result = store
                .transition(&job_id, JobEvent::PlanSucceeded, None)
                .await;
            assert!(matches!(
                result,
                Err(StoreError::InvalidTransition {
                    from: JobState::Queued,
                    event: JobEvent::PlanSucceeded,
                })
            ));
            // Status untouched.
            assert_eq!(
                store.current_state(&job_id).await.unwrap(),
                JobState::Queued
            );
        })
        .await;
    }

    #[tokio::test]
    async fn test_failure_event_merges_error_details() {
        let (_client, store) = setup().await;
        run_with_scope(TenantScope::new("tenant-a"), async {
            let job_id = store.create(&new_job()).await.unwrap();
            store
                .transition(&job_id, JobEvent::StartPlanning, None)
                .await
                .unwrap();
            store
                .transition(&job_id, JobEvent::PlanFailed, Some("model exploded"))
                .await
                .unwrap();

            let metadata = store.get(&job_id).await.unwrap().metadata_json();
            assert_eq!(metadata["errorDetails"], "model exploded");
            assert_eq!(metadata["failedAt"], "PLANNING");
            // The original issue details survive the merge.
            assert_eq!(metadata["issueNumber"], 123);
        })
        .await;
    }

    #[tokio::test]
    async fn test_history_appends_in_order() {
        let (_client, store) = setup().await;
        run_with_scope(TenantScope::new("tenant-a"), async {
            let job_id = store.create(&new_job()).await.unwrap();
            store
                .transition(&job_id, JobEvent::StartPlanning, None)
                .await
                .unwrap();
            store
                .transition(&job_id, JobEvent::PlanSucceeded, None)
                .await
                .unwrap();

            let history = store.history(&job_id).await.unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].from_status, JobState::Queued);
            assert_eq!(history[0].to_status, JobState::Planning);
            assert_eq!(history[1].event, JobEvent::PlanSucceeded);
            assert_eq!(history[1].to_status, JobState::Coding);
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_terminal_transitions_only_one_wins() {
        let (_client, store) = setup().await;
        run_with_scope(TenantScope::new("tenant-a"), async {
            let job_id = store.create(&new_job()).await.unwrap();

            let cancel = store.transition(&job_id, JobEvent::Cancel, None);
            let fail = store.transition(&job_id, JobEvent::Fail, None);
            let (cancel, fail) = tokio::join!(cancel, fail);

            let winners = [cancel.is_ok(), fail.is_ok()]
                .iter()
                .filter(|ok| **ok)
                .count();
            assert_eq!(winners, 1);

            let final_state = store.current_state(&job_id).await.unwrap();
            assert!(final_state.is_terminal());
            assert_eq!(store.history(&job_id).await.unwrap().len(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn test_jobs_invisible_across_tenants() {
        let (client, store) = setup().await;

        // A second tenant.
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO tenants (id, github_installation_id, github_account_login,
               github_account_type, installed_at, installation_status, plan_id, created_at, updated_at)
               VALUES ('tenant-b', 67890, 'tenant-b', 'User', ?, 'ACTIVE', 'plan-1', ?, ?)"#,
        )
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(client.raw())
        .await
        .unwrap();

        let job_id = run_with_scope(TenantScope::new("tenant-a"), async {
            store.create(&new_job()).await.unwrap()
        })
        .await;

        let foreign = run_with_scope(TenantScope::new("tenant-b"), async {
            store.get(&job_id).await
        })
        .await;
        assert!(matches!(foreign, Err(StoreError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_merge_metadata_is_shallow_and_additive() {
        let (_client, store) = setup().await;
        run_with_scope(TenantScope::new("tenant-a"), async {
            let job_id = store.create(&new_job()).await.unwrap();
            store
                .merge_metadata(&job_id, json!({"prNumber": 7, "prUrl": "https://x/pr/7"}))
                .await
                .unwrap();

            let metadata = store.get(&job_id).await.unwrap().metadata_json();
            assert_eq!(metadata["prNumber"], 7);
            assert_eq!(metadata["issueTitle"], "Test Issue");
        })
        .await;
    }
}
