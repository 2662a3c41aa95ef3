use axum::http::StatusCode;

/// Liveness probe; does not touch the queue or the store.
pub async fn health() -> StatusCode {
    StatusCode::OK
}
