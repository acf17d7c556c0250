//! Mendflow orchestration core.
//!
//! Drives an external issue through plan -> code -> review -> pull request
//! with a durable job state machine, database-backed stage queues, and a
//! tenant-isolated storage plane. The AI collaborators and the platform
//! client stay behind the `Agent` and `PullRequestOpener` seams; the core
//! takes an opened pool and exposes a library API.
//!
//! Flow: `JobProducer -> [planning] -> PlanningWorker -> [coding] ->
//! CodingWorker -> [reviewing] -> ReviewingWorker -> { approved: [pr-open]
//! -> PrOpenWorker -> COMPLETED ; rejected: [coding] }`. At every worker
//! boundary the job row is the source of truth; queue messages carry only
//! a reference and stage-local payload.

pub mod github;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod state;
pub mod store;
pub mod workers;

pub use github::{MockPullRequestOpener, OpenedPullRequest, PullRequestError, PullRequestOpener};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use producer::{IssueRef, JobProducer};
pub use queue::{
    Delivery, Handler, Queue, QueueConfig, QueueError, QueueHub, QueueStats, CODING_QUEUE,
    PLANNING_QUEUE, PR_OPEN_QUEUE, REVIEWING_QUEUE,
};
pub use state::{is_valid_transition, next_state, valid_transitions, JobEvent, JobState};
pub use store::{
    InstallationStatus, Job, JobStore, JobTransition, NewJob, NewPlan, NewRepository, NewTenant,
    Plan, PlanStore, Repository, RepositoryStore, StoreError, Tenant, TenantDirectory,
};
pub use workers::{
    CodingWorker, PlanningWorker, PrOpenWorker, ReviewingWorker, StageMessage, StagePayload,
    WorkerConfig,
};
