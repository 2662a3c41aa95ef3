//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: queue/store selection per backend, embedded workers
//! - `routes/`: health check and the WebSocket submission endpoint

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod routes;
pub mod services;

pub use services::{AppServices, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/ws", get(routes::ws::upgrade))
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
