//! End-to-end pipeline tests with the mock agent.
//!
//! The job row is the source of truth and the transition history is
//! append-only, so these tests assert the exact state sequence from
//! history instead of sleep-stepping through intermediate states.

use std::sync::Arc;
use std::time::Duration;

use mendflow_agent::mock::{MockAgent, MockAgentConfig};
use mendflow_agent::{ChangeOperation, CodeResult, Complexity, FileChange, PlanResult, ReviewResult};
use mendflow_db::{create_pool, ensure_schema, DbConfig};
use mendflow_pipeline::{
    Delivery, Handler, IssueRef, JobEvent, JobState, MockPullRequestOpener, NewPlan,
    NewRepository, NewTenant, Pipeline, PipelineConfig, PlanStore, PrOpenWorker, QueueConfig,
    RepositoryStore, StageMessage, StagePayload, TenantDirectory, WorkerConfig,
};
use mendflow_tenancy::{run_with_scope, TenantScope};

struct Harness {
    pipeline: Pipeline,
    agent: Arc<MockAgent>,
    opener: Arc<MockPullRequestOpener>,
    tenant_id: String,
    repository_id: String,
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        queue: QueueConfig {
            initial_backoff: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            rate_per_sec: 50,
            sweep_interval: Duration::from_millis(500),
            ..Default::default()
        },
        worker: WorkerConfig::default(),
    }
}

async fn harness(agent_config: MockAgentConfig, opener: MockPullRequestOpener) -> Harness {
    let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
    ensure_schema(&pool).await.unwrap();

    let agent = Arc::new(MockAgent::new(agent_config));
    let opener = Arc::new(opener);
    let pipeline = Pipeline::new(pool, agent.clone(), opener.clone(), fast_config())
        .await
        .unwrap();

    // Seed: one plan, one active tenant, one monitored repository.
    let client = pipeline.client();
    let plan_id = PlanStore::new(client.clone())
        .create(NewPlan {
            name: "test-plan".to_string(),
            display_name: "Test Plan".to_string(),
            max_repos: 5,
            max_prs_per_month: 50,
            max_tokens_per_month: 1_000_000,
            max_llm_calls_per_month: 500,
        })
        .await
        .unwrap();
    let directory = TenantDirectory::new(client.clone());
    let tenant_id = directory
        .create(NewTenant {
            github_installation_id: 12345,
            github_account_login: "tenant-a".to_string(),
            github_account_type: "Organization".to_string(),
            plan_id,
        })
        .await
        .unwrap();
    directory
        .set_status(&tenant_id, mendflow_pipeline::InstallationStatus::Active)
        .await
        .unwrap();

    let repository_id = run_with_scope(TenantScope::new(&tenant_id), async {
        RepositoryStore::new(client.clone())
            .add(NewRepository {
                github_repo_id: 1001,
                owner: "acme".to_string(),
                name: "web".to_string(),
            })
            .await
            .unwrap()
    })
    .await;

    Harness {
        pipeline,
        agent,
        opener,
        tenant_id,
        repository_id,
    }
}

impl Harness {
    fn issue(&self) -> IssueRef {
        IssueRef {
            tenant_id: self.tenant_id.clone(),
            repository_id: self.repository_id.clone(),
            issue_number: 123,
            issue_title: "Test Issue".to_string(),
            issue_body: "Something is broken".to_string(),
            issue_url: "https://example.test/acme/web/issues/123".to_string(),
        }
    }

    async fn wait_terminal(&self, job_id: &str, timeout: Duration) -> JobState {
        let store = self.pipeline.store();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let state = run_with_scope(TenantScope::new(&self.tenant_id), async {
                store.current_state(job_id).await.unwrap()
            })
            .await;
            if state.is_terminal() {
                return state;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "job {job_id} did not reach a terminal state in time (last: {state})"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn scoped<F, T>(&self, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        run_with_scope(TenantScope::new(&self.tenant_id), fut).await
    }
}

#[tokio::test]
async fn happy_path_walks_every_stage_in_order() {
    let h = harness(MockAgentConfig::default(), MockPullRequestOpener::new()).await;
    h.pipeline.start().await.unwrap();

    let job_id = h.pipeline.create_job(h.issue()).await.unwrap();
    let final_state = h.wait_terminal(&job_id, Duration::from_secs(30)).await;
    assert_eq!(final_state, JobState::Completed);

    let store = h.pipeline.store();
    let history = h.scoped(store.history(&job_id)).await.unwrap();
    let observed: Vec<JobState> = std::iter::once(history[0].from_status)
        .chain(history.iter().map(|t| t.to_status))
        .collect();
    assert_eq!(
        observed,
        vec![
            JobState::Queued,
            JobState::Planning,
            JobState::Coding,
            JobState::Reviewing,
            JobState::PrOpen,
            JobState::Completed,
        ]
    );

    // Each capability ran exactly once; the PR landed in metadata.
    assert_eq!(h.agent.plan_calls(), 1);
    assert_eq!(h.agent.code_calls(), 1);
    assert_eq!(h.agent.review_calls(), 1);
    assert_eq!(h.opener.calls(), 1);

    let job = h.scoped(store.get(&job_id)).await.unwrap();
    let metadata = job.metadata_json();
    assert_eq!(metadata["prNumber"], 1123);
    assert!(metadata["prUrl"].as_str().unwrap().contains("pull/1123"));

    h.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn planning_failure_lands_in_failed_with_details() {
    let h = harness(
        MockAgentConfig {
            fail_planning: true,
            ..Default::default()
        },
        MockPullRequestOpener::new(),
    )
    .await;
    h.pipeline.start().await.unwrap();

    let job_id = h.pipeline.create_job(h.issue()).await.unwrap();
    let final_state = h.wait_terminal(&job_id, Duration::from_secs(30)).await;
    assert_eq!(final_state, JobState::Failed);

    let store = h.pipeline.store();
    let metadata = h.scoped(store.get(&job_id)).await.unwrap().metadata_json();
    assert_eq!(metadata["failedAt"], "PLANNING");
    assert!(!metadata["errorDetails"].as_str().unwrap().is_empty());

    // Nothing downstream ran.
    assert_eq!(h.agent.code_calls(), 0);
    assert_eq!(h.opener.calls(), 0);

    h.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn rejection_loop_is_bounded() {
    let h = harness(
        MockAgentConfig {
            reject_review: true,
            ..Default::default()
        },
        MockPullRequestOpener::new(),
    )
    .await;
    h.pipeline.start().await.unwrap();

    let job_id = h.pipeline.create_job(h.issue()).await.unwrap();
    let final_state = h.wait_terminal(&job_id, Duration::from_secs(30)).await;
    assert_eq!(final_state, JobState::Failed);

    let store = h.pipeline.store();
    let history = h.scoped(store.history(&job_id)).await.unwrap();

    // At least one REVIEWING -> CODING back-transition, and exactly as many
    // as the cap allows.
    let rejections: Vec<_> = history
        .iter()
        .filter(|t| t.event == JobEvent::ReviewRejected)
        .collect();
    assert_eq!(rejections.len(), 3);
    assert!(rejections
        .iter()
        .all(|t| t.from_status == JobState::Reviewing && t.to_status == JobState::Coding));

    // Coding ran once per attempt: the initial pass plus one per rejection.
    assert_eq!(h.agent.code_calls(), 4);
    assert_eq!(h.agent.review_calls(), 4);

    let metadata = h.scoped(store.get(&job_id)).await.unwrap().metadata_json();
    assert_eq!(metadata["failedAt"], "REVIEWING");
    assert!(metadata["errorDetails"]
        .as_str()
        .unwrap()
        .contains("rejection limit"));

    h.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn cancelled_job_is_abandoned_without_writes() {
    let h = harness(MockAgentConfig::default(), MockPullRequestOpener::new()).await;

    // Cancel before any consumer runs.
    let job_id = h.pipeline.create_job(h.issue()).await.unwrap();
    let store = h.pipeline.store();
    h.scoped(store.transition(&job_id, JobEvent::Cancel, None))
        .await
        .unwrap();

    h.pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let state = h.scoped(store.current_state(&job_id)).await.unwrap();
    assert_eq!(state, JobState::Cancelled);
    assert_eq!(h.agent.plan_calls(), 0);

    let history = h.scoped(store.history(&job_id)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event, JobEvent::Cancel);

    h.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn redelivery_after_completion_never_repeats_the_terminal_transition() {
    let h = harness(MockAgentConfig::default(), MockPullRequestOpener::new()).await;
    h.pipeline.start().await.unwrap();

    let job_id = h.pipeline.create_job(h.issue()).await.unwrap();
    assert_eq!(
        h.wait_terminal(&job_id, Duration::from_secs(30)).await,
        JobState::Completed
    );
    h.pipeline.shutdown(Duration::from_secs(2)).await;
    let history_before = h.scoped(h.pipeline.store().history(&job_id)).await.unwrap();

    // Simulate a crashed pr-open worker whose message comes back: hand the
    // same job straight to a fresh worker.
    let replay_opener = Arc::new(MockPullRequestOpener::new());
    let worker = PrOpenWorker::new(
        h.pipeline.store(),
        replay_opener.clone(),
        WorkerConfig::default(),
    );
    let plan = PlanResult {
        summary: "replayed".to_string(),
        steps: vec![],
        files_changed: vec![],
        estimated_complexity: Complexity::Low,
        metadata: serde_json::Value::Null,
    };
    let code = CodeResult {
        changes: vec![FileChange {
            path: "src/issue_123.rs".to_string(),
            operation: ChangeOperation::Update,
            content: Some(String::new()),
            original_content: None,
        }],
        commit_message: "Fix issue #123".to_string(),
        branch: "mendflow/issue-123".to_string(),
        metadata: serde_json::Value::Null,
    };
    let review = ReviewResult {
        approved: true,
        feedback: None,
        suggested_changes: vec![],
        security_issues: vec![],
        quality_score: 90,
        metadata: serde_json::Value::Null,
    };
    let message = StageMessage {
        job_id: job_id.clone(),
        tenant_id: h.tenant_id.clone(),
        repository_id: h.repository_id.clone(),
        issue_number: 123,
        issue_title: "Test Issue".to_string(),
        issue_body: String::new(),
        issue_url: String::new(),
        payload: StagePayload::PrOpen { plan, code, review },
    };
    let delivery = Delivery {
        queue: "pr-open".to_string(),
        message_id: job_id.clone(),
        payload: serde_json::to_value(&message).unwrap(),
        attempt: 1,
        lease: uuid::Uuid::new_v4().to_string(),
    };
    worker.handle(&delivery).await.unwrap();

    // The redelivery was dropped: no second PR, no new history.
    assert_eq!(replay_opener.calls(), 0);
    let history_after = h.scoped(h.pipeline.store().history(&job_id)).await.unwrap();
    assert_eq!(history_before.len(), history_after.len());
    assert_eq!(
        h.scoped(h.pipeline.store().current_state(&job_id))
            .await
            .unwrap(),
        JobState::Completed
    );
}

#[tokio::test]
async fn pr_failure_lands_in_failed() {
    let h = harness(MockAgentConfig::default(), MockPullRequestOpener::failing()).await;
    h.pipeline.start().await.unwrap();

    let job_id = h.pipeline.create_job(h.issue()).await.unwrap();
    let final_state = h.wait_terminal(&job_id, Duration::from_secs(30)).await;
    assert_eq!(final_state, JobState::Failed);

    let metadata = h
        .scoped(h.pipeline.store().get(&job_id))
        .await
        .unwrap()
        .metadata_json();
    assert_eq!(metadata["failedAt"], "PR_OPEN");

    h.pipeline.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn shutdown_leaves_the_hub_empty_and_restartable() {
    let h = harness(MockAgentConfig::default(), MockPullRequestOpener::new()).await;
    h.pipeline.start().await.unwrap();

    let job_id = h.pipeline.create_job(h.issue()).await.unwrap();
    assert_eq!(
        h.wait_terminal(&job_id, Duration::from_secs(30)).await,
        JobState::Completed
    );

    h.pipeline.shutdown(Duration::from_secs(2)).await;
    assert_eq!(h.pipeline.hub().queue_count().await, 0);

    // A fresh start processes new work.
    h.pipeline.start().await.unwrap();
    let second = h.pipeline.create_job(h.issue()).await.unwrap();
    assert_eq!(
        h.wait_terminal(&second, Duration::from_secs(30)).await,
        JobState::Completed
    );
    h.pipeline.shutdown(Duration::from_secs(2)).await;
}
