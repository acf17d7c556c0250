//! PR-open worker: `PR_OPEN -> COMPLETED`.
//!
//! Invokes the external pull-request collaborator. At-least-once delivery
//! means this handler can run again after the job completed; the entry
//! check drops the redelivery so the terminal transition never repeats and
//! no second pull request is attempted for an already-settled job.

use std::sync::Arc;

use async_trait::async_trait;
use mendflow_tenancy::{run_with_scope, TenantScope};
use tracing::warn;

use super::{entered_in_state, transition_or_abandon, StageMessage, StagePayload, WorkerConfig};
use crate::github::PullRequestOpener;
use crate::queue::{Delivery, Handler};
use crate::state::{JobEvent, JobState};
use crate::store::JobStore;

pub struct PrOpenWorker {
    store: Arc<JobStore>,
    opener: Arc<dyn PullRequestOpener>,
    config: WorkerConfig,
}

impl PrOpenWorker {
    pub fn new(
        store: Arc<JobStore>,
        opener: Arc<dyn PullRequestOpener>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            opener,
            config,
        }
    }

    async fn process(&self, message: StageMessage) -> anyhow::Result<()> {
        let StagePayload::PrOpen { code, .. } = message.payload.clone() else {
            warn!(job_id = %message.job_id, "unexpected payload on pr-open queue; dropping");
            return Ok(());
        };

        let job_id = message.job_id.clone();
        if !entered_in_state(&self.store, &job_id, JobState::PrOpen).await? {
            return Ok(());
        }

        let ctx = message.context();
        let outcome = tokio::time::timeout(
            self.config.pr_open_deadline,
            self.opener.open_pull_request(&ctx, &code),
        )
        .await;

        match outcome {
            Ok(Ok(pr)) => {
                self.store
                    .merge_metadata(
                        &job_id,
                        serde_json::json!({ "prNumber": pr.number, "prUrl": pr.url }),
                    )
                    .await?;
                transition_or_abandon(&self.store, &job_id, JobEvent::PrOpened, None).await?;
                Ok(())
            }
            Ok(Err(error)) => {
                transition_or_abandon(
                    &self.store,
                    &job_id,
                    JobEvent::PrFailed,
                    Some(&error.to_string()),
                )
                .await?;
                Ok(())
            }
            Err(_) => {
                let details = format!(
                    "pull request deadline of {}s exceeded",
                    self.config.pr_open_deadline.as_secs()
                );
                transition_or_abandon(&self.store, &job_id, JobEvent::PrFailed, Some(&details))
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Handler for PrOpenWorker {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let message = StageMessage::from_delivery(delivery)?;
        let scope = TenantScope::new(&message.tenant_id);
        run_with_scope(scope, self.process(message)).await
    }
}
