// Main entry point for the content pipeline server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pipeline::postgres::{PgContentStore, PgJobStore};
use pipeline::{ContentPipeline, Worker, WorkerConfig};
use server_core::{build_app, AppState, Config, OpenAiGenerationClient};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,pipeline=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting content pipeline server");

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    // Shared stores and collaborators
    let content_store = Arc::new(PgContentStore::new(pool.clone()));
    let job_store = Arc::new(PgJobStore::new(pool.clone()));
    let generation_client = Arc::new(OpenAiGenerationClient::new(config.openai_api_key.clone()));

    let content_pipeline = Arc::new(
        ContentPipeline::new(content_store.clone(), generation_client)
            .with_generation_timeout(Duration::from_secs(config.generation_timeout_secs)),
    );

    // Background worker with graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Worker::new(
        job_store.clone(),
        content_pipeline.clone(),
        WorkerConfig {
            worker_id: config.worker_id.clone(),
            ..WorkerConfig::default()
        },
    )
    .register(content_pipeline);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let app = build_app(AppState {
        content_store,
        job_queue: job_store,
        max_retries: config.max_retries,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    // Stop the worker after the HTTP surface has drained
    let _ = shutdown_tx.send(true);
    worker_handle.await.context("Worker task panicked")?;

    tracing::info!("Shutdown complete");
    Ok(())
}
