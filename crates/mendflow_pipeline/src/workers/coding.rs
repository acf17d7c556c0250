//! Coding worker: `CODING -> REVIEWING`.
//!
//! Entered either from planning or from a review rejection; the `attempts`
//! counter in the payload tracks the rejection loop.

use std::sync::Arc;

use async_trait::async_trait;
use mendflow_agent::Agent;
use mendflow_tenancy::{run_with_scope, TenantScope};
use tracing::warn;

use super::{entered_in_state, forward, transition_or_abandon, StageMessage, StagePayload, WorkerConfig};
use crate::queue::{Delivery, Handler, QueueHub, REVIEWING_QUEUE};
use crate::state::{JobEvent, JobState};
use crate::store::JobStore;

pub struct CodingWorker {
    store: Arc<JobStore>,
    hub: Arc<QueueHub>,
    agent: Arc<dyn Agent>,
    config: WorkerConfig,
}

impl CodingWorker {
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
        let StagePayload::Coding { plan, attempts } = message.payload.clone() else {
            warn!(job_id = %message.job_id, "unexpected payload on coding queue; dropping");
            return Ok(());
        };

        // The predecessor already transitioned; entering is not ours to
        // re-transition.
        let job_id = message.job_id.clone();
        if !entered_in_state(&self.store, &job_id, JobState::Coding).await? {
            return Ok(());
        }

        let ctx = message.context();
        let outcome =
            tokio::time::timeout(self.config.coding_deadline, self.agent.code(&ctx, &plan)).await;

        match outcome {
            Ok(Ok(code)) => {
                if transition_or_abandon(&self.store, &job_id, JobEvent::CodeSucceeded, None)
                    .await?
                    .is_none()
                {
                    return Ok(());
                }
                forward(
                    &self.hub,
                    REVIEWING_QUEUE,
                    &message.forward_with(StagePayload::Reviewing {
                        plan,
                        code,
                        attempts,
                    }),
                )
                .await
            }
            Ok(Err(error)) => {
                transition_or_abandon(
                    &self.store,
                    &job_id,
                    JobEvent::CodeFailed,
                    Some(&error.summary()),
                )
                .await?;
                Ok(())
            }
            Err(_) => {
                let details = format!(
                    "coding deadline of {}s exceeded",
                    self.config.coding_deadline.as_secs()
                );
                transition_or_abandon(&self.store, &job_id, JobEvent::CodeFailed, Some(&details))
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Handler for CodingWorker {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let message = StageMessage::from_delivery(delivery)?;
        let scope = TenantScope::new(&message.tenant_id);
        run_with_scope(scope, self.process(message)).await
    }
}
