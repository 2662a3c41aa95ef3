//! Execution worker process: `BYTEME_WORKERS` consumer loops against Redis.

use std::sync::Arc;

use anyhow::Context;
use byteme_infra::config::Settings;
use byteme_infra::executor::CodeExecutor;
use byteme_infra::queue::{JobQueue, RedisStreamsJobQueue};
use byteme_infra::redis_pool::RedisConnector;
use byteme_infra::result_store::{RedisResultStore, ResultStore};
use byteme_infra::workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    byteme_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let executor: Arc<dyn CodeExecutor> =
        Arc::new(workers::executor_from_settings(&settings).context("failed to prepare executor")?);

    let store: Arc<dyn ResultStore> = Arc::new(
        RedisResultStore::new(&settings.redis_url).context("invalid redis url")?,
    );

    // One connection per loop: a blocking read holds its connection.
    let mut queues: Vec<Arc<dyn JobQueue>> = Vec::with_capacity(settings.workers);
    for _ in 0..settings.workers {
        let connector = RedisConnector::new(&settings.redis_url).context("invalid redis url")?;
        queues.push(Arc::new(RedisStreamsJobQueue::with_connector(
            connector,
            settings.queue.clone(),
        )));
    }

    let prefix = format!("worker-{}", std::process::id());
    let handles = workers::spawn_workers(&settings, &prefix, queues, store, executor);
    tracing::info!(
        workers = handles.len(),
        queue = %settings.queue.name,
        interpreter = %settings.interpreter,
        "worker process started"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested; finishing in-flight jobs");

    for handle in handles {
        let stats = handle.shutdown().await;
        tracing::info!(
            processed = stats.jobs_processed,
            succeeded = stats.jobs_succeeded,
            failed = stats.jobs_failed,
            rejected = stats.jobs_rejected,
            store_failures = stats.store_failures,
            "worker stopped"
        );
    }
    Ok(())
}
