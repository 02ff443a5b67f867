use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tracing::{info, Instrument};
use uuid::Uuid;

use super::handlers;
use super::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/spec/upload", post(handlers::upload_spec))
        .route("/api/spec/:job_id/summary", get(handlers::get_summary))
        .route("/api/spec/:job_id/state", get(handlers::get_state))
        .route("/api/spec/:job_id/export", get(handlers::export_summary))
        .route(
            "/api/spec/:job_id/query",
            post(handlers::submit_query).get(handlers::get_query_result),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(request_log_middleware))
        .with_state(state)
}

async fn request_log_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let span = tracing::info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let response = next.run(request).await;
        info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await
}
