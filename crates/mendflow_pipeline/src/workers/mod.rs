//! Stage workers.
//!
//! One consumer per stage. The common shape: decode the stage message,
//! re-establish the tenant scope it carries, check the job is still where
//! the pipeline expects it (abandoning terminal or already-advanced jobs
//! without writing), invoke the agent under the stage deadline, fire the
//! stage's success or failure event, and forward the job to the next queue
//! with the job id as the message id.
//!
//! Exactly one worker owns each transition, at the exit of the producing
//! worker. Only the planning worker transitions on entry - it owns
//! `QUEUED -> PLANNING`; every other worker is entered with the job already
//! in the right state by its predecessor.

pub mod coding;
pub mod planning;
pub mod pr_open;
pub mod reviewing;

use std::time::Duration;

use mendflow_agent::{CodeResult, JobContext, PlanResult, ReviewResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::queue::{Delivery, QueueHub};
use crate::state::{JobEvent, JobState};
use crate::store::{JobStore, StoreError};

pub use coding::CodingWorker;
pub use planning::PlanningWorker;
pub use pr_open::PrOpenWorker;
pub use reviewing::ReviewingWorker;

/// Per-stage deadlines and the rejection cap.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub planning_deadline: Duration,
    pub coding_deadline: Duration,
    pub reviewing_deadline: Duration,
    pub pr_open_deadline: Duration,
    /// Review rejections tolerated before the job fails outright.
    pub max_review_rejections: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            planning_deadline: Duration::from_secs(15 * 60),
            coding_deadline: Duration::from_secs(30 * 60),
            reviewing_deadline: Duration::from_secs(15 * 60),
            pr_open_deadline: Duration::from_secs(5 * 60),
            max_review_rejections: 3,
        }
    }
}

/// Stage-local payload carried between workers. The job row in storage is
/// the source of truth; this is working material only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StagePayload {
    /// Producer -> planning
    Queued,
    /// Planning (or a review rejection) -> coding
    Coding { plan: PlanResult, attempts: u32 },
    /// Coding -> reviewing
    Reviewing {
        plan: PlanResult,
        code: CodeResult,
        attempts: u32,
    },
    /// Reviewing -> pr-open
    PrOpen {
        plan: PlanResult,
        code: CodeResult,
        review: ReviewResult,
    },
}

/// The envelope every queue message carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMessage {
    pub job_id: String,
    pub tenant_id: String,
    pub repository_id: String,
    pub issue_number: i64,
    pub issue_title: String,
    pub issue_body: String,
    pub issue_url: String,
    pub payload: StagePayload,
}

impl StageMessage {
    pub fn from_delivery(delivery: &Delivery) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(delivery.payload.clone())?)
    }

    /// The agent-facing view of this message.
    pub fn context(&self) -> JobContext {
        JobContext {
            job_id: self.job_id.clone(),
            tenant_id: self.tenant_id.clone(),
            repository_id: self.repository_id.clone(),
            issue_number: self.issue_number,
            issue_title: self.issue_title.clone(),
            issue_body: self.issue_body.clone(),
            issue_url: self.issue_url.clone(),
        }
    }

    /// Same envelope, next stage's payload.
    pub fn forward_with(&self, payload: StagePayload) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }
}

/// Enqueue a stage message with the job id as the message id, so crashed
/// workers re-enqueueing cannot create duplicates.
pub(crate) async fn forward(
    hub: &QueueHub,
    queue_name: &str,
    message: &StageMessage,
) -> anyhow::Result<()> {
    let payload = serde_json::to_value(message)?;
    hub.queue(queue_name)
        .await?
        .enqueue(&message.job_id, &payload)
        .await?;
    Ok(())
}

/// Check that the job is in the state this worker expects on entry.
///
/// Returns false when the message should be dropped: the job is terminal
/// (cancelled or already settled), has advanced past this stage (crash
/// redelivery after the exit transition), or no longer resolves.
pub(crate) async fn entered_in_state(
    store: &JobStore,
    job_id: &str,
    expected: JobState,
) -> anyhow::Result<bool> {
    let state = match store.current_state(job_id).await {
        Ok(state) => state,
        Err(StoreError::JobNotFound(_)) => {
            warn!(job_id, "message references unknown job; dropping");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    if state.is_terminal() {
        info!(job_id, %state, "job already terminal; dropping message");
        return Ok(false);
    }
    if state != expected {
        warn!(job_id, %state, %expected, "job not in entry state; dropping message");
        return Ok(false);
    }
    Ok(true)
}

/// Fire an exit transition, tolerating the races at-least-once delivery
/// creates: a transition that is no longer applicable (the job was
/// cancelled, or a redelivered handler already moved it) is abandoned
/// without writing; storage failures bubble up for queue-level retry.
pub(crate) async fn transition_or_abandon(
    store: &JobStore,
    job_id: &str,
    event: JobEvent,
    error_details: Option<&str>,
) -> anyhow::Result<Option<JobState>> {
    match store.transition(job_id, event, error_details).await {
        Ok(state) => Ok(Some(state)),
        Err(StoreError::InvalidTransition { from, event }) => {
            info!(job_id, %from, %event, "transition not applicable; abandoning");
            Ok(None)
        }
        Err(StoreError::TransitionConflict { .. }) => {
            info!(job_id, %event, "lost transition race; abandoning");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
