//! Job queue: durable, ordered, at-least-once hand-off from gateway to workers.
//!
//! ## Delivery contract
//!
//! - `publish` is fire-and-forget; no reply is expected.
//! - A fetched [`Delivery`] stays owned by its consumer until `ack` or `nack`.
//! - `nack` makes the job eligible for redelivery; after too many deliveries
//!   the job is dead-lettered instead.
//! - A consumer that dies without acknowledging leaves its delivery pending;
//!   another consumer reclaims it once it has been idle long enough.
//! - FIFO for one producer/consumer pair; no ordering across several.
//!
//! Consumers must tolerate duplicates (the worker's store write is an
//! overwrite, so a redelivered job yields an equivalent outcome).

use std::time::Duration;

use async_trait::async_trait;

use byteme_core::Job;

pub mod in_memory;
pub mod redis_streams;

pub use in_memory::InMemoryJobQueue;
pub use redis_streams::RedisStreamsJobQueue;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue command failed: {0}")]
    Command(String),

    #[error("job serialization failed: {0}")]
    Serialization(String),

    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),
}

/// One job handed to a consumer.
///
/// `body` is kept raw so a malformed job can still be rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned handle used to ack/nack.
    pub tag: String,
    /// JSON-encoded job.
    pub body: String,
    /// How many times this job has been delivered, this delivery included.
    pub attempts: u32,
}

/// What happened to a negatively acknowledged delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    DeadLettered,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the queue.
    async fn publish(&self, job: &Job) -> Result<(), QueueError>;

    /// Take the next job for `consumer`, waiting up to `block` for one.
    async fn fetch(&self, consumer: &str, block: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Mark a delivery as done.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Give a delivery back for redelivery (or dead-letter it).
    async fn nack(&self, delivery: Delivery) -> Result<NackOutcome, QueueError>;
}

pub(crate) fn encode_job(job: &Job) -> Result<String, QueueError> {
    job.encode().map_err(|e| QueueError::Serialization(e.to_string()))
}
