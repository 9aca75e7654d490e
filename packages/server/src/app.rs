//! Application setup and router construction.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use pipeline::{ContentStore, JobQueue};
use tower_http::trace::TraceLayer;

use crate::routes::{create_content_handler, get_content_handler, health_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub content_store: Arc<dyn ContentStore>,
    pub job_queue: Arc<dyn JobQueue>,
    /// Retry budget stamped onto every generation job at enqueue time.
    pub max_retries: i32,
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/content", post(create_content_handler))
        .route("/api/content/:id", get(get_content_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
