use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use byteme_core::StatusFrame;
use byteme_infra::config::{Backend, Settings};
use byteme_infra::executor::CodeExecutor;
use byteme_infra::queue::{InMemoryJobQueue, JobQueue, RedisStreamsJobQueue};
use byteme_infra::result_store::{InMemoryResultStore, RedisResultStore, ResultStore};
use byteme_infra::workers::{self, WorkerError, WorkerHandle};

use crate::session::{Session, SessionConfig};

/// Shared handles every connection works against.
pub struct AppServices {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn ResultStore>,
    pub session: SessionConfig,
}

impl AppServices {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ResultStore>, session: SessionConfig) -> Self {
        Self { queue, store, session }
    }

    /// A session for one new connection.
    pub fn session(&self, outbound: UnboundedSender<StatusFrame>) -> Session {
        Session::new(self.queue.clone(), self.store.clone(), self.session, outbound)
    }
}

/// Wire queue and store for the configured backend.
///
/// The memory backend has no external workers, so it also spawns
/// `settings.workers` in-process ones; the caller owns their handles.
pub fn build_services(settings: &Settings) -> Result<(AppServices, Vec<WorkerHandle>), WorkerError> {
    let session = SessionConfig::from_settings(settings);

    match settings.backend {
        Backend::Redis => {
            let queue = RedisStreamsJobQueue::new(&settings.redis_url, settings.queue.clone())?;
            let store = RedisResultStore::new(&settings.redis_url)?;
            info!(queue = %settings.queue.name, "using redis backend");
            Ok((AppServices::new(Arc::new(queue), Arc::new(store), session), Vec::new()))
        }
        Backend::Memory => {
            let queue = Arc::new(InMemoryJobQueue::new(settings.queue.max_deliveries));
            let store = Arc::new(InMemoryResultStore::new());
            let executor: Arc<dyn CodeExecutor> = Arc::new(workers::executor_from_settings(settings)?);

            let queues: Vec<Arc<dyn JobQueue>> = (0..settings.workers)
                .map(|_| queue.clone() as Arc<dyn JobQueue>)
                .collect();
            let handles = workers::spawn_workers(settings, "embedded", queues, store.clone(), executor);
            info!(workers = handles.len(), "using in-memory backend with embedded workers");

            Ok((AppServices::new(queue, store, session), handles))
        }
    }
}
