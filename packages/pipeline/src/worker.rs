//! Worker loop: poll the job store, dispatch by job type, ack or fail.
//!
//! Policy lives here, not in the store: polling cadence, batch size, and the
//! decision to invoke the terminal-failure hook once a job dead-letters.
//! Handlers stay dumb - they receive a claimed job and return a result; the
//! worker owns classification and bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::queue::{ClaimedJob, FailureDisposition, FailureKind, JobStore};

/// Errors a job handler can return, with explicit retry classification.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload could not be deserialized. Permanent: the bytes will not
    /// improve on retry.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// Execution failed for a possibly transient reason (backend fault).
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            HandlerError::InvalidPayload(_) => FailureKind::NonRetryable,
            HandlerError::Failed(_) => FailureKind::Retryable,
        }
    }
}

/// Executes one kind of job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Key this handler is registered under; must match `JobSpec::job_type`.
    fn job_type(&self) -> &'static str;

    async fn handle(&self, job: &ClaimedJob) -> Result<(), HandlerError>;
}

/// Invoked when the queue gives up on a job.
///
/// This is the second, infrastructure-triggered path into a terminal failure
/// state, independent of any error the handler itself recorded. It runs even
/// if the handler never got to run at all.
#[async_trait]
pub trait TerminalFailureHook: Send + Sync {
    async fn on_retries_exhausted(
        &self,
        reference_id: Option<Uuid>,
        reason: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_millis(500),
            batch_size: 10,
        }
    }
}

/// Polls a [`JobStore`] and drives registered handlers.
pub struct Worker {
    store: Arc<dyn JobStore>,
    hook: Arc<dyn TerminalFailureHook>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        hook: Arc<dyn TerminalFailureHook>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            hook,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register a handler for its job type.
    ///
    /// # Panics
    ///
    /// Panics if a handler is already registered for the type; this is a
    /// wiring bug, not a runtime condition.
    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        let job_type = handler.job_type();
        if self.handlers.insert(job_type, handler).is_some() {
            panic!("handler already registered for job type: {}", job_type);
        }
        self
    }

    /// Claim and process one batch. Returns how many jobs were processed.
    ///
    /// Exposed separately from [`Worker::run`] so tests can drive the loop
    /// deterministically.
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let jobs = self
            .store
            .claim_ready(&self.config.worker_id, self.config.batch_size)
            .await?;
        let count = jobs.len();

        for job in jobs {
            self.process(job).await;
        }

        Ok(count)
    }

    async fn process(&self, job: ClaimedJob) {
        debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempt, "processing job");

        let (message, kind) = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => match handler.handle(&job).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_succeeded(job.id).await {
                        error!(job_id = %job.id, error = %e, "failed to ack job");
                    }
                    return;
                }
                Err(e) => (e.to_string(), e.failure_kind()),
            },
            // No handler will ever appear for this delivery; dead-letter now.
            None => (
                format!("unknown job type: {}", job.job_type),
                FailureKind::NonRetryable,
            ),
        };

        warn!(job_id = %job.id, attempt = job.attempt, error = %message, "job failed");

        match self.store.mark_failed(job.id, &message, kind).await {
            Ok(FailureDisposition::Scheduled { next_run_at }) => {
                debug!(job_id = %job.id, next_run_at = %next_run_at, "job rescheduled");
            }
            Ok(FailureDisposition::DeadLettered) => {
                info!(job_id = %job.id, "job dead-lettered, invoking terminal failure hook");
                if let Err(e) = self
                    .hook
                    .on_retries_exhausted(job.reference_id, &message)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "terminal failure hook failed");
                }
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to record job failure");
            }
        }
    }

    /// Run until the shutdown signal flips to `true`.
    ///
    /// Sleeps the poll interval only when a batch came back empty, so a
    /// backlog drains at full speed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.config.worker_id, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let processed = match self.tick().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "worker tick failed");
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        // A dropped sender means nobody can signal us again;
                        // stop instead of spinning on the closed channel.
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "worker stopped");
    }
}
