//! Result store: expiring key/value cache holding execution outcomes.
//!
//! Keys are `result:<job id>`; values are JSON-encoded `ExecutionOutcome`s.
//! Writes are unconditional (last write wins) and carry a TTL after which the
//! outcome is no longer retrievable. The store is never coupled to the queue:
//! a worker writes first and acknowledges second.

use std::time::Duration;

use async_trait::async_trait;

pub mod in_memory;
pub mod redis_store;

pub use in_memory::InMemoryResultStore;
pub use redis_store::RedisResultStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("result store unavailable: {0}")]
    Unavailable(String),

    #[error("result store command failed: {0}")]
    Command(String),
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Current value of `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Wait until `key` may have been written, or `max_wait` elapses.
    ///
    /// Stores that cannot signal writes simply sleep; callers must re-read
    /// either way.
    async fn wait_for_update(&self, _key: &str, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}
