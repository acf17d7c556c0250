//! Pipeline lifecycle.
//!
//! Wires the stores, the queue hub, and one worker per stage over an opened
//! pool. `start` registers the four consumers; `shutdown` drains in-flight
//! handlers up to a deadline and resets the hub so a subsequent start gets
//! fresh queue instances. The pool itself belongs to the embedder.

use std::sync::Arc;
use std::time::Duration;

use mendflow_agent::Agent;
use mendflow_db::DbPool;
use mendflow_tenancy::{TenancyError, TenantClient};
use thiserror::Error;
use tracing::info;

use crate::github::PullRequestOpener;
use crate::producer::{IssueRef, JobProducer};
use crate::queue::{
    QueueConfig, QueueError, QueueHub, CODING_QUEUE, PLANNING_QUEUE, PR_OPEN_QUEUE,
    REVIEWING_QUEUE,
};
use crate::store::{JobStore, StoreError};
use crate::workers::{
    CodingWorker, PlanningWorker, PrOpenWorker, ReviewingWorker, WorkerConfig,
};

/// Top-level pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pipeline tuning.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
}

/// The orchestration core, assembled.
pub struct Pipeline {
    client: Arc<TenantClient>,
    store: Arc<JobStore>,
    hub: Arc<QueueHub>,
    producer: JobProducer,
    agent: Arc<dyn Agent>,
    pr_opener: Arc<dyn PullRequestOpener>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Assemble over an opened pool. The schema must already exist (the
    /// embedder runs `mendflow_db::ensure_schema` or its migrations first).
    pub async fn new(
        pool: DbPool,
        agent: Arc<dyn Agent>,
        pr_opener: Arc<dyn PullRequestOpener>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let client = Arc::new(TenantClient::new(pool.clone()).await?);
        let store = Arc::new(JobStore::new(client.clone()));
        let hub = Arc::new(QueueHub::new(pool, config.queue.clone()));
        let producer = JobProducer::new(store.clone(), hub.clone());

        Ok(Self {
            client,
            store,
            hub,
            producer,
            agent,
            pr_opener,
            config,
        })
    }

    /// The tenant-aware client this pipeline reads and writes through.
    pub fn client(&self) -> Arc<TenantClient> {
        self.client.clone()
    }

    pub fn store(&self) -> Arc<JobStore> {
        self.store.clone()
    }

    pub fn hub(&self) -> Arc<QueueHub> {
        self.hub.clone()
    }

    /// Register one consumer per stage.
    pub async fn start(&self) -> Result<(), PipelineError> {
        let worker_config = self.config.worker.clone();

        self.hub
            .consume(
                PLANNING_QUEUE,
                Arc::new(PlanningWorker::new(
                    self.store.clone(),
                    self.hub.clone(),
                    self.agent.clone(),
                    worker_config.clone(),
                )),
            )
            .await?;
        self.hub
            .consume(
                CODING_QUEUE,
                Arc::new(CodingWorker::new(
                    self.store.clone(),
                    self.hub.clone(),
                    self.agent.clone(),
                    worker_config.clone(),
                )),
            )
            .await?;
        self.hub
            .consume(
                REVIEWING_QUEUE,
                Arc::new(ReviewingWorker::new(
                    self.store.clone(),
                    self.hub.clone(),
                    self.agent.clone(),
                    worker_config.clone(),
                )),
            )
            .await?;
        self.hub
            .consume(
                PR_OPEN_QUEUE,
                Arc::new(PrOpenWorker::new(
                    self.store.clone(),
                    self.pr_opener.clone(),
                    worker_config,
                )),
            )
            .await?;

        info!("pipeline started");
        Ok(())
    }

    /// Create a job for an issue and seed the pipeline.
    pub async fn create_job(&self, issue: IssueRef) -> Result<String, PipelineError> {
        self.producer.create_job(issue).await
    }

    /// Drain consumers up to `deadline` and reset the queue hub.
    pub async fn shutdown(&self, deadline: Duration) {
        self.hub.shutdown(deadline).await;
        info!("pipeline stopped");
    }
}
