use std::sync::Arc;

use anyhow::Context;
use byteme_infra::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    byteme_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let (services, workers) =
        byteme_gateway::app::build_services(&settings).context("failed to wire services")?;
    let app = byteme_gateway::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!(backend = ?settings.backend, "listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    for worker in workers {
        let stats = worker.shutdown().await;
        tracing::info!(
            processed = stats.jobs_processed,
            failed = stats.jobs_failed,
            "embedded worker stopped"
        );
    }
    Ok(())
}
