//! Planning worker: `QUEUED -> PLANNING -> CODING`.

use std::sync::Arc;

use async_trait::async_trait;
use mendflow_agent::Agent;
use mendflow_tenancy::{run_with_scope, TenantScope};
use tracing::info;

use super::{forward, transition_or_abandon, StageMessage, StagePayload, WorkerConfig};
use crate::queue::{Delivery, Handler, QueueHub, CODING_QUEUE};
use crate::state::{JobEvent, JobState};
use crate::store::{JobStore, StoreError};

pub struct PlanningWorker {
    store: Arc<JobStore>,
    hub: Arc<QueueHub>,
    agent: Arc<dyn Agent>,
    config: WorkerConfig,
}

impl PlanningWorker {
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
        let job_id = message.job_id.clone();

        // Transition first, work second: this worker owns QUEUED -> PLANNING.
        match self
            .store
            .transition(&job_id, JobEvent::StartPlanning, None)
            .await
        {
            Ok(_) => {}
            // Crash redelivery mid-stage: we already own PLANNING, resume.
            Err(StoreError::InvalidTransition {
                from: JobState::Planning,
                ..
            }) => {
                info!(%job_id, "resuming planning after redelivery");
            }
            // Cancelled, or already advanced past this stage: abandon.
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!(%job_id, %from, "planning no longer applicable; dropping message");
                return Ok(());
            }
            Err(StoreError::TransitionConflict { .. }) => {
                info!(%job_id, "lost the entry transition race; dropping message");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let ctx = message.context();
        let outcome =
            tokio::time::timeout(self.config.planning_deadline, self.agent.plan(&ctx)).await;

        match outcome {
            Ok(Ok(plan)) => {
                if transition_or_abandon(&self.store, &job_id, JobEvent::PlanSucceeded, None)
                    .await?
                    .is_none()
                {
                    return Ok(());
                }
                forward(
                    &self.hub,
                    CODING_QUEUE,
                    &message.forward_with(StagePayload::Coding { plan, attempts: 0 }),
                )
                .await
            }
            Ok(Err(error)) => {
                transition_or_abandon(
                    &self.store,
                    &job_id,
                    JobEvent::PlanFailed,
                    Some(&error.summary()),
                )
                .await?;
                Ok(())
            }
            Err(_) => {
                let details = format!(
                    "planning deadline of {}s exceeded",
                    self.config.planning_deadline.as_secs()
                );
                transition_or_abandon(&self.store, &job_id, JobEvent::PlanFailed, Some(&details))
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Handler for PlanningWorker {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let message = StageMessage::from_delivery(delivery)?;
        let scope = TenantScope::new(&message.tenant_id);
        run_with_scope(scope, self.process(message)).await
    }
}
