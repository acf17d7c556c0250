//! Job producer.
//!
//! Turns an external issue reference into a job row (QUEUED) and the first
//! queue message. The id is returned synchronously; the pipeline runs
//! asynchronously from there.

use std::sync::Arc;

use mendflow_tenancy::{run_with_scope, TenantScope};
use tracing::info;

use crate::pipeline::PipelineError;
use crate::queue::{QueueHub, PLANNING_QUEUE};
use crate::store::{JobStore, NewJob};
use crate::workers::{StageMessage, StagePayload};

/// Reference to an issue on the hosted platform.
#[derive(Debug, Clone)]
pub struct IssueRef {
    pub tenant_id: String,
    pub repository_id: String,
    pub issue_number: i64,
    pub issue_title: String,
    pub issue_body: String,
    pub issue_url: String,
}

pub struct JobProducer {
    store: Arc<JobStore>,
    hub: Arc<QueueHub>,
}

impl JobProducer {
    pub fn new(store: Arc<JobStore>, hub: Arc<QueueHub>) -> Self {
        Self { store, hub }
    }

    /// Create the job and seed the planning queue, message id = job id.
    ///
    /// The producer is an inbound boundary: it establishes the tenant scope
    /// from the issue reference itself.
    pub async fn create_job(&self, issue: IssueRef) -> Result<String, PipelineError> {
        let scope = TenantScope::new(&issue.tenant_id);
        run_with_scope(scope, async {
            let job_id = self
                .store
                .create(&NewJob {
                    repository_id: issue.repository_id.clone(),
                    issue_number: issue.issue_number,
                    issue_title: issue.issue_title.clone(),
                    issue_body: issue.issue_body.clone(),
                    issue_url: issue.issue_url.clone(),
                })
                .await?;

            let message = StageMessage {
                job_id: job_id.clone(),
                tenant_id: issue.tenant_id.clone(),
                repository_id: issue.repository_id.clone(),
                issue_number: issue.issue_number,
                issue_title: issue.issue_title.clone(),
                issue_body: issue.issue_body.clone(),
                issue_url: issue.issue_url.clone(),
                payload: StagePayload::Queued,
            };
            let payload = serde_json::to_value(&message)?;
            self.hub
                .queue(PLANNING_QUEUE)
                .await?
                .enqueue(&job_id, &payload)
                .await?;

            info!(%job_id, issue = issue.issue_number, "job created");
            Ok(job_id)
        })
        .await
    }
}
