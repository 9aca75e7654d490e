//! HTTP-level tests for the content API, running against in-memory stores.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use pipeline::testing::{InMemoryContentStore, InMemoryJobQueue, MockGenerationClient};
use pipeline::{ContentPipeline, Worker, WorkerConfig};
use serde_json::{json, Value};
use server_core::{build_app, AppState};
use tower::ServiceExt;

struct TestHarness {
    app: Router,
    content_store: Arc<InMemoryContentStore>,
    job_queue: Arc<InMemoryJobQueue>,
    client: Arc<MockGenerationClient>,
}

fn harness() -> TestHarness {
    let content_store = Arc::new(InMemoryContentStore::new());
    let job_queue = Arc::new(InMemoryJobQueue::default());
    let client = Arc::new(MockGenerationClient::new());

    let app = build_app(AppState {
        content_store: content_store.clone(),
        job_queue: job_queue.clone(),
        max_retries: 3,
    });

    TestHarness {
        app,
        content_store,
        job_queue,
        client,
    }
}

impl TestHarness {
    fn worker(&self) -> Worker {
        let pipeline = Arc::new(ContentPipeline::new(
            self.content_store.clone(),
            self.client.clone(),
        ));
        Worker::new(
            self.job_queue.clone(),
            pipeline.clone(),
            WorkerConfig::default(),
        )
        .register(pipeline)
    }
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn submission_creates_pending_record_and_enqueues_job() {
    let h = harness();

    let (status, body) = post_json(
        &h.app,
        "/api/content",
        json!({ "tenant": "acme", "kind": "transcript", "text": "a talk about ducks" }),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert!(body["id"].is_string());
    assert_eq!(h.job_queue.pending_count(), 1);
    assert_eq!(h.content_store.len(), 1);
}

#[tokio::test]
async fn polling_reflects_the_record_through_to_ready() {
    let h = harness();

    let (_, created) = post_json(
        &h.app,
        "/api/content",
        json!({ "tenant": "acme", "kind": "transcript", "text": "a talk about ducks" }),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, view) = get_json(&h.app, &format!("/api/content/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "pending");
    assert!(view.get("slug").is_none());

    // Drain the queue, then poll again.
    let worker = h.worker();
    assert_eq!(worker.tick().await.unwrap(), 1);

    let (status, view) = get_json(&h.app, &format!("/api/content/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "ready");
    assert_eq!(view["title"], "Generated Title");
    assert_eq!(view["slug"], "generated-title");
    assert!(view.get("error_message").is_none());
}

#[tokio::test]
async fn missing_record_returns_not_found() {
    let h = harness();
    let (status, body) = get_json(
        &h.app,
        "/api/content/00000000-0000-0000-0000-000000000000",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn malformed_submission_is_rejected() {
    let h = harness();
    let (status, _) = post_json(&h.app, "/api/content", json!({ "tenant": "acme" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(h.content_store.len(), 0);
}

#[tokio::test]
async fn resubmitting_the_same_record_does_not_double_enqueue() {
    let h = harness();

    let (_, created) = post_json(
        &h.app,
        "/api/content",
        json!({ "tenant": "acme", "kind": "transcript", "text": "once" }),
    )
    .await;
    // A second submission is a new record, hence a new job.
    post_json(
        &h.app,
        "/api/content",
        json!({ "tenant": "acme", "kind": "transcript", "text": "twice" }),
    )
    .await;
    assert_eq!(h.job_queue.pending_count(), 2);
    assert!(created["id"].is_string());
}

#[tokio::test]
async fn failed_generation_surfaces_error_message_to_pollers() {
    let content_store = Arc::new(InMemoryContentStore::new());
    let job_queue = Arc::new(InMemoryJobQueue::default());
    let client = Arc::new(MockGenerationClient::new().with_api_error("rate limited"));

    let app = build_app(AppState {
        content_store: content_store.clone(),
        job_queue: job_queue.clone(),
        max_retries: 3,
    });

    let (_, created) = post_json(
        &app,
        "/api/content",
        json!({ "tenant": "acme", "kind": "transcript", "text": "doomed" }),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let pipeline = Arc::new(ContentPipeline::new(content_store.clone(), client));
    let worker = Worker::new(
        job_queue.clone(),
        pipeline.clone(),
        WorkerConfig::default(),
    )
    .register(pipeline);
    worker.tick().await.unwrap();

    let (status, view) = get_json(&app, &format!("/api/content/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "failed");
    assert!(view["error_message"]
        .as_str()
        .unwrap()
        .contains("rate limited"));
}

#[tokio::test]
async fn url_source_round_trips_through_the_api() {
    let h = harness();

    let (status, created) = post_json(
        &h.app,
        "/api/content",
        json!({ "tenant": "acme", "kind": "url", "url": "https://example.org/talk" }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let worker = h.worker();
    worker.tick().await.unwrap();

    // The generation client received the URL as its source text.
    let calls = h.client.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://example.org/talk");
    assert_eq!(calls[0].1, "acme");

    let id = created["id"].as_str().unwrap();
    let (_, view) = get_json(&h.app, &format!("/api/content/{}", id)).await;
    assert_eq!(view["status"], "ready");
}

#[tokio::test]
async fn health_endpoint_responds_ok() {
    let h = harness();
    let (status, body) = get_json(&h.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
