//! Lazily-established, auto-reconnecting Redis connection.
//!
//! Each adapter owns one `RedisConnector`. The first command establishes a
//! multiplexed `ConnectionManager`; later commands clone it (cheap). The
//! manager reconnects with exponential backoff after a dropped connection,
//! so callers never hold a broken handle across requests.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

/// Backoff used when (re)establishing a connection: base^n * factor ms.
const BACKOFF_EXPONENT_BASE: u64 = 2;
const BACKOFF_FACTOR_MS: u64 = 100;
const BACKOFF_RETRIES: usize = 6;

#[derive(Clone)]
pub struct RedisConnector {
    client: redis::Client,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl std::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("addr", &self.client.get_connection_info().addr)
            .field("connected", &self.manager.initialized())
            .finish()
    }
}

impl RedisConnector {
    /// Parse the URL. No connection is made until first use.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client,
            manager: Arc::new(OnceCell::new()),
        })
    }

    /// A handle to the shared connection, establishing it if needed.
    #[instrument(skip(self), err)]
    pub async fn connection(&self) -> Result<ConnectionManager, redis::RedisError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new_with_backoff(
                    self.client.clone(),
                    BACKOFF_EXPONENT_BASE,
                    BACKOFF_FACTOR_MS,
                    BACKOFF_RETRIES,
                )
                .await?;
                info!(addr = %self.client.get_connection_info().addr, "redis connection established");
                Ok::<_, redis::RedisError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}
