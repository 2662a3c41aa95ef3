//! Redis-backed result store (`SET key value EX ttl` / `GET key`).

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::instrument;

use super::{ResultStore, StoreError};
use crate::redis_pool::RedisConnector;

#[derive(Debug, Clone)]
pub struct RedisResultStore {
    connector: RedisConnector,
}

impl RedisResultStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let connector = RedisConnector::new(redis_url).map_err(to_store_error)?;
        Ok(Self::with_connector(connector))
    }

    pub fn with_connector(connector: RedisConnector) -> Self {
        Self { connector }
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, StoreError> {
        self.connector.connection().await.map_err(to_store_error)
    }
}

fn to_store_error(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    #[instrument(skip(self, value), fields(bytes = value.len(), ttl_secs = ttl.as_secs()), err)]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        // Sub-second TTLs round up; EX 0 is rejected by Redis.
        let ttl_secs = ttl.as_secs().max(1);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(to_store_error)
    }

    #[instrument(skip(self), level = "debug", err)]
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(to_store_error)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }
}
