//! HTTP handlers for the content API.
//!
//! `POST /api/content` accepts a generation request, creates the `pending`
//! record, and enqueues the job - the 202 response carries the record id the
//! client polls. `GET /api/content/:id` is the polling read: one point read
//! rendered as a [`ProgressView`].

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use pipeline::{ContentRecord, ContentSource, GenerateContentJob, ProgressView};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateContentRequest {
    pub tenant: String,
    #[serde(flatten)]
    pub source: ContentSource,
}

#[derive(Serialize)]
pub struct CreateContentResponse {
    pub id: Uuid,
    pub status: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn internal_error(context: &str, err: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %err, "{}", context);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: context.to_string(),
        }),
    )
}

/// Accept a generation request.
///
/// The record and the job are created here, in that order; if the enqueue
/// fails the record stays `pending` and the client may retry - the job's
/// idempotency key keeps a retried submission from double-enqueueing.
pub async fn create_content_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<CreateContentRequest>,
) -> Result<(StatusCode, Json<CreateContentResponse>), (StatusCode, Json<ErrorResponse>)> {
    let source_text = match &request.source {
        ContentSource::Transcript { text } => text.clone(),
        // Upload/url sources are resolved to text by upstream stages before
        // generation; the job payload carries a reference for them.
        ContentSource::Upload { media_id } => format!("upload:{}", media_id),
        ContentSource::Url { url } => url.clone(),
    };

    let record = ContentRecord::new(&request.tenant, request.source);
    let record = state
        .content_store
        .insert(record)
        .await
        .map_err(|e| internal_error("failed to create content record", e))?;

    let job = GenerateContentJob {
        record_id: record.id,
        source_text,
        tenant: record.tenant.clone(),
    };
    let payload = serde_json::to_value(&job)
        .map_err(|e| internal_error("failed to serialize job payload", e))?;
    let job_id = state
        .job_queue
        .enqueue(payload, job.spec(state.max_retries))
        .await
        .map_err(|e| internal_error("failed to enqueue generation job", e))?;

    info!(record_id = %record.id, job_id = %job_id, tenant = %record.tenant, "accepted generation request");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateContentResponse {
            id: record.id,
            status: record.status.to_string(),
        }),
    ))
}

/// Polling read for a single record.
pub async fn get_content_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProgressView>, (StatusCode, Json<ErrorResponse>)> {
    let record = state
        .content_store
        .get(id)
        .await
        .map_err(|e| internal_error("failed to read content record", e))?;

    match record {
        Some(record) => Ok(Json(ProgressView::from(&record))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("content record {} not found", id),
            }),
        )),
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
