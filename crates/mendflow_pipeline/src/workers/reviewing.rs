//! Reviewing worker: `REVIEWING -> PR_OPEN` on approval, back to `CODING`
//! on rejection, `FAILED` once the rejection cap is exhausted.

use std::sync::Arc;

use async_trait::async_trait;
use mendflow_agent::Agent;
use mendflow_tenancy::{run_with_scope, TenantScope};
use tracing::{info, warn};

use super::{entered_in_state, forward, transition_or_abandon, StageMessage, StagePayload, WorkerConfig};
use crate::queue::{Delivery, Handler, QueueHub, CODING_QUEUE, PR_OPEN_QUEUE};
use crate::state::{JobEvent, JobState};
use crate::store::JobStore;

pub struct ReviewingWorker {
    store: Arc<JobStore>,
    hub: Arc<QueueHub>,
    agent: Arc<dyn Agent>,
    config: WorkerConfig,
}

impl ReviewingWorker {
    pub fn new(
        store: Arc<JobStore>,
        hub: Arc<QueueHub>,
        agent: Arc<dyn Agent>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            hub,
            agent,
            config,
        }
    }

    async fn process(&self, message: StageMessage) -> anyhow::Result<()> {
        let StagePayload::Reviewing {
            plan,
            code,
            attempts,
        } = message.payload.clone()
        else {
            warn!(job_id = %message.job_id, "unexpected payload on reviewing queue; dropping");
            return Ok(());
        };

        let job_id = message.job_id.clone();
        if !entered_in_state(&self.store, &job_id, JobState::Reviewing).await? {
            return Ok(());
        }

        let ctx = message.context();
        let outcome = tokio::time::timeout(
            self.config.reviewing_deadline,
            self.agent.review(&ctx, &plan, &code),
        )
        .await;

        let review = match outcome {
            Ok(Ok(review)) => review,
            Ok(Err(error)) => {
                transition_or_abandon(
                    &self.store,
                    &job_id,
                    JobEvent::ReviewFailed,
                    Some(&error.summary()),
                )
                .await?;
                return Ok(());
            }
            Err(_) => {
                let details = format!(
                    "reviewing deadline of {}s exceeded",
                    self.config.reviewing_deadline.as_secs()
                );
                transition_or_abandon(
                    &self.store,
                    &job_id,
                    JobEvent::ReviewFailed,
                    Some(&details),
                )
                .await?;
                return Ok(());
            }
        };

        if review.approved {
            if transition_or_abandon(&self.store, &job_id, JobEvent::ReviewApproved, None)
                .await?
                .is_none()
            {
                return Ok(());
            }
            return forward(
                &self.hub,
                PR_OPEN_QUEUE,
                &message.forward_with(StagePayload::PrOpen { plan, code, review }),
            )
            .await;
        }

        // Rejected. The loop is bounded: past the cap the job fails with a
        // distinct reason instead of thrashing between coding and review.
        let next_attempts = attempts + 1;
        if next_attempts > self.config.max_review_rejections {
            let details = format!(
                "change set rejected {next_attempts} times; rejection limit of {} reached",
                self.config.max_review_rejections
            );
            transition_or_abandon(&self.store, &job_id, JobEvent::ReviewFailed, Some(&details))
                .await?;
            return Ok(());
        }

        info!(%job_id, attempts = next_attempts, "review rejected; re-entering coding");
        if let Some(feedback) = &review.feedback {
            self.store
                .merge_metadata(&job_id, serde_json::json!({ "reviewFeedback": feedback }))
                .await?;
        }
        if transition_or_abandon(&self.store, &job_id, JobEvent::ReviewRejected, None)
            .await?
            .is_none()
        {
            return Ok(());
        }
        forward(
            &self.hub,
            CODING_QUEUE,
            &message.forward_with(StagePayload::Coding {
                plan,
                attempts: next_attempts,
            }),
        )
        .await
    }
}

#[async_trait]
impl Handler for ReviewingWorker {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let message = StageMessage::from_delivery(delivery)?;
        let scope = TenantScope::new(&message.tenant_id);
        run_with_scope(scope, self.process(message)).await
    }
}
