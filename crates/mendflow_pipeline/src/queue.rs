//! Stage queue substrate.
//!
//! Named durable FIFO queues over a single `queue_messages` table, with
//! at-least-once delivery. Claims are atomic UPDATE-WHERE conditional
//! writes, so concurrent consumers never double-claim; redelivery comes
//! from retry backoff and from a reaper that requeues claims whose worker
//! died. Enqueue is idempotent per (queue, message id): an in-flight
//! duplicate collapses into the existing message, a finished one is
//! reactivated.
//!
//! Handlers must be idempotent keyed by message id - the same message may
//! be seen more than once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mendflow_db::DbPool;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Stage queue names.
pub const PLANNING_QUEUE: &str = "planning";
pub const CODING_QUEUE: &str = "coding";
pub const REVIEWING_QUEUE: &str = "reviewing";
pub const PR_OPEN_QUEUE: &str = "pr-open";

/// Queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Tuning for every queue in the hub.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Delivery attempts before a message is parked as FAILED
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub initial_backoff: Duration,
    /// Handlers running in parallel per queue
    pub concurrency: usize,
    /// Claim attempts per second per queue
    pub rate_per_sec: u32,
    /// Idle sleep when the queue is empty
    pub poll_interval: Duration,
    /// A RUNNING claim older than this is presumed dead and requeued
    pub claim_timeout: Duration,
    /// Completed messages kept this long...
    pub completed_retention: Duration,
    /// ...and never more than this many per queue
    pub completed_max: u32,
    /// Failed messages kept this long
    pub failed_retention: Duration,
    /// Reaper/retention cadence
    pub sweep_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            concurrency: 5,
            rate_per_sec: 10,
            poll_interval: Duration::from_millis(50),
            claim_timeout: Duration::from_secs(45 * 60),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            completed_max: 1000,
            failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// One claimed message handed to a handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub message_id: String,
    pub payload: serde_json::Value,
    /// 1-based delivery attempt
    pub attempt: u32,
    /// Claim lease. Ack/nack only settle the message while this lease is
    /// still current, so a handler that outlives a re-enqueue of its
    /// message id cannot settle the newer generation.
    pub lease: String,
}

/// A stage consumer. Implementations must be idempotent keyed by message
/// id; a returned error schedules a retry until attempts are exhausted.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

/// Per-queue counts.
#[derive(Debug, sqlx::FromRow)]
pub struct QueueStats {
    pub ready: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

/// One named queue. Cheap to clone the Arc; all state is in the table.
pub struct Queue {
    name: String,
    pool: DbPool,
    config: QueueConfig,
}

impl Queue {
    fn new(name: &str, pool: DbPool, config: QueueConfig) -> Self {
        Self {
            name: name.to_string(),
            pool,
            config,
        }
    }

    /// Enqueue a message, idempotently.
    ///
    /// A message id that is already READY collapses into the existing
    /// message, so duplicate enqueues by a crashed producer create nothing.
    /// Any other generation (RUNNING, COMPLETED, FAILED) is superseded:
    /// the row is reactivated with the new payload, a reset attempt
    /// counter, and a cleared lease, which lets the review-rejection loop
    /// re-enter a stage under the same job id.
    pub async fn enqueue(
        &self,
        message_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), QueueError> {
        let now = now_millis();
        sqlx::query(
            r#"
            INSERT INTO queue_messages (queue, message_id, payload, status, attempts, visible_at, enqueued_at)
            VALUES (?, ?, ?, 'READY', 0, ?, ?)
            ON CONFLICT(queue, message_id) DO UPDATE SET
                payload = excluded.payload,
                status = 'READY',
                attempts = 0,
                visible_at = excluded.visible_at,
                enqueued_at = excluded.enqueued_at,
                claimed_at = NULL,
                lease = NULL,
                finished_at = NULL,
                last_error = NULL
            WHERE queue_messages.status IN ('RUNNING', 'COMPLETED', 'FAILED')
            "#,
        )
        .bind(&self.name)
        .bind(message_id)
        .bind(payload.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(queue = %self.name, message_id, "enqueued");
        Ok(())
    }

    /// Atomically claim the next visible message, if any.
    pub async fn claim(&self) -> Result<Option<Delivery>, QueueError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let candidate: Option<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT message_id, payload, attempts FROM queue_messages
            WHERE queue = ? AND status = 'READY' AND visible_at <= ?
            ORDER BY enqueued_at ASC, message_id ASC
            LIMIT 1
            "#,
        )
        .bind(&self.name)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((message_id, payload, attempts)) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let lease = uuid::Uuid::new_v4().to_string();
        let claimed = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'RUNNING', claimed_at = ?, lease = ?, attempts = attempts + 1
            WHERE queue = ? AND message_id = ? AND status = 'READY'
            "#,
        )
        .bind(now)
        .bind(&lease)
        .bind(&self.name)
        .bind(&message_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if claimed == 0 {
            // Another consumer won the race.
            return Ok(None);
        }

        Ok(Some(Delivery {
            queue: self.name.clone(),
            message_id,
            payload: serde_json::from_str(&payload)?,
            attempt: attempts as u32 + 1,
            lease,
        }))
    }

    /// Mark a delivered message as completed. A stale lease (the message
    /// was superseded by a newer enqueue) settles nothing.
    pub async fn ack(&self, message_id: &str, lease: &str) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'COMPLETED', finished_at = ?
            WHERE queue = ? AND message_id = ? AND status = 'RUNNING' AND lease = ?
            "#,
        )
        .bind(now_millis())
        .bind(&self.name)
        .bind(message_id)
        .bind(lease)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a handler failure: schedule a retry with exponential backoff,
    /// or park the message as FAILED once attempts are exhausted. Lease
    /// discipline as in [`Queue::ack`].
    pub async fn nack(
        &self,
        message_id: &str,
        lease: &str,
        attempt: u32,
        error_text: &str,
    ) -> Result<(), QueueError> {
        let now = now_millis();
        if attempt >= self.config.max_attempts {
            sqlx::query(
                r#"
                UPDATE queue_messages
                SET status = 'FAILED', finished_at = ?, last_error = ?
                WHERE queue = ? AND message_id = ? AND status = 'RUNNING' AND lease = ?
                "#,
            )
            .bind(now)
            .bind(error_text)
            .bind(&self.name)
            .bind(message_id)
            .bind(lease)
            .execute(&self.pool)
            .await?;
            warn!(queue = %self.name, message_id, attempt, "message failed permanently");
            return Ok(());
        }

        let backoff = self.config.initial_backoff.as_millis() as i64
            * (1i64 << (attempt.saturating_sub(1)).min(20));
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'READY', visible_at = ?, last_error = ?
            WHERE queue = ? AND message_id = ? AND status = 'RUNNING' AND lease = ?
            "#,
        )
        .bind(now + backoff)
        .bind(error_text)
        .bind(&self.name)
        .bind(message_id)
        .bind(lease)
        .execute(&self.pool)
        .await?;
        info!(queue = %self.name, message_id, attempt, backoff_ms = backoff, "retry scheduled");
        Ok(())
    }

    /// Reap dead claims and apply retention.
    pub async fn sweep(&self) -> Result<(), QueueError> {
        let now = now_millis();
        let claim_cutoff = now - self.config.claim_timeout.as_millis() as i64;

        // A dead worker's claim with attempts left goes back to READY...
        let requeued = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'READY', visible_at = ?
            WHERE queue = ? AND status = 'RUNNING' AND claimed_at < ? AND attempts < ?
            "#,
        )
        .bind(now)
        .bind(&self.name)
        .bind(claim_cutoff)
        .bind(self.config.max_attempts as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if requeued > 0 {
            warn!(queue = %self.name, requeued, "requeued expired claims");
        }

        // ...one with attempts exhausted is parked.
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'FAILED', finished_at = ?, last_error = 'claim expired'
            WHERE queue = ? AND status = 'RUNNING' AND claimed_at < ? AND attempts >= ?
            "#,
        )
        .bind(now)
        .bind(&self.name)
        .bind(claim_cutoff)
        .bind(self.config.max_attempts as i64)
        .execute(&self.pool)
        .await?;

        // Retention: completed messages age out, and are capped in number.
        let completed_cutoff = now - self.config.completed_retention.as_millis() as i64;
        sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE queue = ? AND status = 'COMPLETED' AND finished_at < ?
            "#,
        )
        .bind(&self.name)
        .bind(completed_cutoff)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE queue = ? AND status = 'COMPLETED' AND message_id NOT IN (
                SELECT message_id FROM queue_messages
                WHERE queue = ? AND status = 'COMPLETED'
                ORDER BY finished_at DESC
                LIMIT ?
            )
            "#,
        )
        .bind(&self.name)
        .bind(&self.name)
        .bind(self.config.completed_max as i64)
        .execute(&self.pool)
        .await?;

        let failed_cutoff = now - self.config.failed_retention.as_millis() as i64;
        sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE queue = ? AND status = 'FAILED' AND finished_at < ?
            "#,
        )
        .bind(&self.name)
        .bind(failed_cutoff)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let stats: QueueStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'READY') as ready,
                COUNT(*) FILTER (WHERE status = 'RUNNING') as running,
                COUNT(*) FILTER (WHERE status = 'COMPLETED') as completed,
                COUNT(*) FILTER (WHERE status = 'FAILED') as failed
            FROM queue_messages
            WHERE queue = ?
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

// ============================================================================
// Hub: lazy queue instances, consumers, graceful drain
// ============================================================================

struct ConsumerTask {
    queue: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct HubInner {
    queues: HashMap<String, Arc<Queue>>,
    consumers: Vec<ConsumerTask>,
    schema_ready: bool,
}

/// Process-wide set of queue instances.
///
/// Queues touch the database only on first use, so the hub can be built
/// before the schema exists (tests start the broker late). Shutdown drains
/// consumers and resets the instance map; a subsequent start gets fresh
/// instances.
pub struct QueueHub {
    pool: DbPool,
    config: QueueConfig,
    inner: Mutex<HubInner>,
}

impl QueueHub {
    pub fn new(pool: DbPool, config: QueueConfig) -> Self {
        Self {
            pool,
            config,
            inner: Mutex::new(HubInner::default()),
        }
    }

    /// Get or lazily create the named queue.
    pub async fn queue(&self, name: &str) -> Result<Arc<Queue>, QueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.schema_ready {
            mendflow_db::schema::ensure_queue_schema(&self.pool)
                .await
                .map_err(queue_error_from_db)?;
            inner.schema_ready = true;
        }
        let queue = inner
            .queues
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Queue::new(name, self.pool.clone(), self.config.clone()))
            })
            .clone();
        Ok(queue)
    }

    /// Number of live queue instances (empty after shutdown).
    pub async fn queue_count(&self) -> usize {
        self.inner.lock().await.queues.len()
    }

    /// Spawn a consumer for the named queue.
    pub async fn consume(&self, name: &str, handler: Arc<dyn Handler>) -> Result<(), QueueError> {
        let queue = self.queue(name).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(consumer_loop(queue, handler, shutdown_rx));
        self.inner.lock().await.consumers.push(ConsumerTask {
            queue: name.to_string(),
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop consumers, draining in-flight handlers up to `deadline`, then
    /// reset the queue instance map.
    pub async fn shutdown(&self, deadline: Duration) {
        let consumers = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.consumers)
        };

        for consumer in &consumers {
            let _ = consumer.shutdown_tx.send(true);
        }

        let deadline_at = Instant::now() + deadline;
        for consumer in consumers {
            let ConsumerTask {
                queue,
                mut handle,
                ..
            } = consumer;
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!(%queue, "consumer did not drain before deadline; aborting");
                handle.abort();
            }
        }

        let mut inner = self.inner.lock().await;
        inner.queues.clear();
        inner.schema_ready = false;
        info!("queue hub reset");
    }
}

fn queue_error_from_db(error: mendflow_db::DbError) -> QueueError {
    match error {
        mendflow_db::DbError::Sqlx(e) => QueueError::Sqlx(e),
        other => QueueError::Sqlx(sqlx::Error::Protocol(other.to_string())),
    }
}

async fn consumer_loop(
    queue: Arc<Queue>,
    handler: Arc<dyn Handler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = queue.config.clone();
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut rate = tokio::time::interval(rate_period(config.rate_per_sec));
    rate.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let mut last_sweep = Instant::now();

    info!(queue = %queue.name, "consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if last_sweep.elapsed() >= config.sweep_interval {
            if let Err(e) = queue.sweep().await {
                warn!(queue = %queue.name, error = %e, "sweep failed");
            }
            last_sweep = Instant::now();
        }

        // Reap finished handlers without blocking.
        while in_flight.try_join_next().is_some() {}

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // All handler slots busy; wait for one to free up.
                tokio::select! {
                    _ = in_flight.join_next() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
        };

        tokio::select! {
            _ = rate.tick() => {}
            _ = shutdown.changed() => {
                drop(permit);
                continue;
            }
        }

        match queue.claim().await {
            Ok(Some(delivery)) => {
                let queue = queue.clone();
                let handler = handler.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    match handler.handle(&delivery).await {
                        Ok(()) => {
                            if let Err(e) = queue.ack(&delivery.message_id, &delivery.lease).await {
                                error!(queue = %queue.name, message_id = %delivery.message_id,
                                       error = %e, "ack failed");
                            }
                        }
                        Err(e) => {
                            warn!(queue = %queue.name, message_id = %delivery.message_id,
                                  attempt = delivery.attempt, error = %e, "handler failed");
                            if let Err(e) = queue
                                .nack(
                                    &delivery.message_id,
                                    &delivery.lease,
                                    delivery.attempt,
                                    &e.to_string(),
                                )
                                .await
                            {
                                error!(queue = %queue.name, message_id = %delivery.message_id,
                                       error = %e, "nack failed");
                            }
                        }
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                drop(permit);
                error!(queue = %queue.name, error = %e, "claim failed");
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    // Drain: in-flight handlers finish against a live pool before the hub
    // reports the consumer stopped.
    while in_flight.join_next().await.is_some() {}
    info!(queue = %queue.name, "consumer drained");
}

fn rate_period(rate_per_sec: u32) -> Duration {
    Duration::from_secs(1) / rate_per_sec.max(1)
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
