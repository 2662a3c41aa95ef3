//! Redis Streams-backed job queue (durable, at-least-once delivery).
//!
//! - **Stream key**: the queue name (default `code_execution`); each entry has
//!   a `body` field (the JSON job) and an optional `attempts` field
//! - **Consumer group**: one group shared by all workers, so each job goes to
//!   exactly one worker at a time (`COUNT 1` keeps one job in flight)
//! - **Redelivery**: `nack` re-appends the job with its attempt count and
//!   acknowledges the original entry; entries left pending by a crashed
//!   consumer are reclaimed with `XCLAIM` once idle long enough
//! - **Dead-letter stream**: `<queue>:dlq`, for jobs that exhausted their
//!   deliveries
//!
//! Durability across broker restarts requires Redis persistence (AOF) to be
//! enabled on the server.
//!
//! Give each consumer loop its own instance: a blocking `XREADGROUP` holds the
//! multiplexed connection for up to the block time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use byteme_core::Job;

use super::{Delivery, JobQueue, NackOutcome, QueueError, encode_job};
use crate::config::QueueSettings;
use crate::redis_pool::RedisConnector;

const BODY_FIELD: &str = "body";
const ATTEMPTS_FIELD: &str = "attempts";

#[derive(Debug, Clone)]
pub struct RedisStreamsJobQueue {
    connector: RedisConnector,
    settings: QueueSettings,
    group_ready: Arc<OnceCell<()>>,
}

impl RedisStreamsJobQueue {
    pub fn new(redis_url: impl AsRef<str>, settings: QueueSettings) -> Result<Self, QueueError> {
        let connector = RedisConnector::new(redis_url).map_err(to_queue_error)?;
        Ok(Self::with_connector(connector, settings))
    }

    pub fn with_connector(connector: RedisConnector, settings: QueueSettings) -> Self {
        Self {
            connector,
            settings,
            group_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, QueueError> {
        self.connector.connection().await.map_err(to_queue_error)
    }

    /// Create the consumer group (and stream) if missing. Idempotent.
    async fn ensure_group(&self) -> Result<(), QueueError> {
        self.group_ready
            .get_or_try_init(|| async {
                let mut conn = self.connection().await?;
                let created: redis::RedisResult<()> = conn
                    .xgroup_create_mkstream(&self.settings.name, &self.settings.consumer_group, "0")
                    .await;
                match created {
                    Ok(()) => Ok(()),
                    Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
                    Err(e) => Err(to_queue_error(e)),
                }
            })
            .await
            .map(|_| ())
    }

    /// Claim one entry another consumer left unacknowledged for too long.
    async fn reclaim_stale(&self, consumer: &str) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let min_idle_ms = self.settings.claim_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.settings.name)
            .arg(&self.settings.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(to_queue_error)?;

        let Some(stale) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.settings.name,
                &self.settings.consumer_group,
                consumer,
                min_idle_ms,
                &[&stale.id],
            )
            .await
            .map_err(to_queue_error)?;

        // Another consumer may have claimed it first.
        let Some(entry) = claimed.ids.into_iter().next() else {
            return Ok(None);
        };

        warn!(
            delivery = %entry.id,
            previous_consumer = %stale.consumer,
            times_delivered = stale.times_delivered,
            "reclaimed stale job"
        );

        let previous = stale.times_delivered as u32;
        Ok(Some(to_delivery(entry, previous + 1)))
    }

    async fn read_new(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let opts = StreamReadOptions::default()
            .group(&self.settings.consumer_group, consumer)
            .count(1)
            .block(block.as_millis().max(1) as usize);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.settings.name], &[">"], &opts)
            .await
            .map_err(to_queue_error)?;

        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next())
            .map(|entry| to_delivery(entry, 1)))
    }
}

/// Build a delivery; `delivered` counts deliveries of this stream entry.
fn to_delivery(entry: StreamId, delivered: u32) -> Delivery {
    let earlier: u32 = entry.get(ATTEMPTS_FIELD).unwrap_or(0);
    let body: String = entry.get(BODY_FIELD).unwrap_or_default();
    Delivery {
        tag: entry.id,
        body,
        attempts: earlier + delivered,
    }
}

fn to_queue_error(e: redis::RedisError) -> QueueError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        QueueError::Unavailable(e.to_string())
    } else {
        QueueError::Command(e.to_string())
    }
}

#[async_trait]
impl JobQueue for RedisStreamsJobQueue {
    #[instrument(skip(self, job), fields(queue = %self.settings.name, job_id = %job.id()), err)]
    async fn publish(&self, job: &Job) -> Result<(), QueueError> {
        let body = encode_job(job)?;
        let mut conn = self.connection().await?;
        let _: String = conn
            .xadd(&self.settings.name, "*", &[(BODY_FIELD, body.as_str())])
            .await
            .map_err(to_queue_error)?;
        Ok(())
    }

    async fn fetch(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, QueueError> {
        self.ensure_group().await?;

        if let Some(delivery) = self.reclaim_stale(consumer).await? {
            return Ok(Some(delivery));
        }

        let delivery = self.read_new(consumer, block).await?;
        if let Some(d) = &delivery {
            debug!(delivery = %d.tag, attempts = d.attempts, consumer, "fetched job");
        }
        Ok(delivery)
    }

    #[instrument(skip(self, delivery), fields(delivery = %delivery.tag), err)]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let acked: i64 = conn
            .xack(&self.settings.name, &self.settings.consumer_group, &[&delivery.tag])
            .await
            .map_err(to_queue_error)?;
        if acked == 0 {
            return Err(QueueError::UnknownDelivery(delivery.tag.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(delivery = %delivery.tag, attempts = delivery.attempts), err)]
    async fn nack(&self, delivery: Delivery) -> Result<NackOutcome, QueueError> {
        let mut conn = self.connection().await?;
        let attempts = delivery.attempts.to_string();

        let (target, outcome) = if delivery.attempts >= self.settings.max_deliveries {
            (self.settings.dead_letter_name(), NackOutcome::DeadLettered)
        } else {
            (self.settings.name.clone(), NackOutcome::Requeued)
        };

        // Re-append and acknowledge atomically so the job is never lost or doubled.
        let failed_at = chrono::Utc::now().to_rfc3339();
        let mut fields = vec![
            (BODY_FIELD, delivery.body.as_str()),
            (ATTEMPTS_FIELD, attempts.as_str()),
        ];
        if outcome == NackOutcome::DeadLettered {
            fields.push(("original_id", delivery.tag.as_str()));
            fields.push(("failed_at", failed_at.as_str()));
        }

        let _: () = redis::pipe()
            .atomic()
            .xadd(&target, "*", &fields)
            .ignore()
            .xack(&self.settings.name, &self.settings.consumer_group, &[&delivery.tag])
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(to_queue_error)?;

        if outcome == NackOutcome::DeadLettered {
            warn!(delivery = %delivery.tag, attempts = delivery.attempts, "job sent to dead-letter stream");
        }
        Ok(outcome)
    }
}
