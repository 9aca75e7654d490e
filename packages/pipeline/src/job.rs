//! Pipeline job orchestration.
//!
//! One run: claim the record, call the generation client under a deadline,
//! land the result under a unique slug, or record the failure. The logic is
//! deliberately idempotent and retry-safe rather than retry-performing -
//! generation failures terminate on the record and are *not* retried here;
//! only backend faults propagate out so the queue's policy can retry them.
//!
//! A failed claim (wrong state, missing record) completes successfully with
//! no mutation: redelivery and duplicate dispatch are silent no-ops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::generation::{GenerationClient, GenerationError};
use crate::queue::{ClaimedJob, JobSpec};
use crate::record::GenerationStage;
use crate::slug::{AllocationOutcome, SlugAllocator, SlugError};
use crate::store::{ClaimOutcome, ContentStore, FailOutcome};
use crate::worker::{HandlerError, JobHandler, TerminalFailureHook};

/// Job type key for content generation.
pub const GENERATE_CONTENT_JOB: &str = "content:generate";

/// Upper bound on anything landed in `error_message`.
pub const MAX_ERROR_MESSAGE_LEN: usize = 512;

/// Inbound job payload, enqueued when a user requests generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentJob {
    pub record_id: Uuid,
    pub source_text: String,
    pub tenant: String,
}

impl GenerateContentJob {
    /// One live job per record: redundant enqueues collapse onto it.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", GENERATE_CONTENT_JOB, self.record_id)
    }

    pub fn spec(&self, max_retries: i32) -> JobSpec {
        JobSpec::new(GENERATE_CONTENT_JOB)
            .with_max_retries(max_retries)
            .with_idempotency_key(self.idempotency_key())
            .with_reference_id(self.record_id)
    }
}

/// What a single run did.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Generation succeeded; the record is `Ready` under `slug`.
    Completed { slug: String },
    /// Generation failed; the record is `Failed` with a message.
    Failed,
    /// Guarded no-op: the record was missing or not claimable.
    Skipped,
}

/// Orchestrates content generation against injected collaborators.
pub struct ContentPipeline {
    store: Arc<dyn ContentStore>,
    client: Arc<dyn GenerationClient>,
    slugs: SlugAllocator,
    generation_timeout: Duration,
}

impl ContentPipeline {
    pub fn new(store: Arc<dyn ContentStore>, client: Arc<dyn GenerationClient>) -> Self {
        Self {
            store,
            client,
            slugs: SlugAllocator::default(),
            generation_timeout: Duration::from_secs(120),
        }
    }

    /// Bound on the generation call; elapsing it is a generation failure,
    /// not a hang. There is no way to abort the in-flight remote call, only
    /// to stop waiting on it.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_slug_allocator(mut self, slugs: SlugAllocator) -> Self {
        self.slugs = slugs;
        self
    }

    /// Execute one pipeline run for `job`.
    ///
    /// Errors returned here are backend faults only; every business outcome
    /// (success, generation failure, guarded no-op) is an `Ok` variant so the
    /// queue does not retry what has already terminated on the record.
    pub async fn run(&self, job: &GenerateContentJob) -> anyhow::Result<RunOutcome> {
        let record_id = job.record_id;

        match self.store.claim(record_id).await? {
            ClaimOutcome::Claimed(_) => {}
            ClaimOutcome::NotClaimable(status) => {
                info!(record_id = %record_id, status = %status, "record not claimable, skipping");
                return Ok(RunOutcome::Skipped);
            }
            ClaimOutcome::NotFound => {
                info!(record_id = %record_id, "record not found, skipping");
                return Ok(RunOutcome::Skipped);
            }
        }

        self.store
            .set_stage(record_id, GenerationStage::Generating, 0)
            .await?;

        let generated = match tokio::time::timeout(
            self.generation_timeout,
            self.client.generate(&job.source_text, &job.tenant),
        )
        .await
        {
            Err(_) => Err(GenerationError::TimedOut(self.generation_timeout.as_secs())),
            Ok(result) => result.and_then(|content| content.validated()),
        };

        let content = match generated {
            Ok(content) => content,
            Err(err) => {
                let message = clip_error(&err.to_string());
                warn!(record_id = %record_id, tenant = %job.tenant, error = %message, "generation failed");
                self.store.fail(record_id, &message).await?;
                return Ok(RunOutcome::Failed);
            }
        };

        match self
            .slugs
            .allocate_and_complete(self.store.as_ref(), record_id, &content)
            .await
        {
            Ok(AllocationOutcome::Applied { slug }) => {
                info!(record_id = %record_id, slug = %slug, "content generated");
                Ok(RunOutcome::Completed { slug })
            }
            Ok(AllocationOutcome::LostClaim) => {
                warn!(record_id = %record_id, "claim lost before completion, skipping");
                Ok(RunOutcome::Skipped)
            }
            Err(err @ SlugError::Exhausted { .. }) => {
                let message = clip_error(&err.to_string());
                warn!(record_id = %record_id, error = %message, "slug allocation exhausted");
                self.store.fail(record_id, &message).await?;
                Ok(RunOutcome::Failed)
            }
            Err(SlugError::Store(err)) => Err(err.into()),
        }
    }

    /// The runtime-exhaustion path into `Failed`, reached when the queue
    /// gives up on the job rather than from an error the run itself saw.
    ///
    /// Writes the failure even if [`ContentPipeline::run`] never executed for
    /// this delivery. Last write wins against an earlier, more specific
    /// message; both paths converge on the same terminal semantics. Records
    /// that already reached `Ready`/`Published`/`Archived` stay untouched.
    pub async fn record_runtime_failure(
        &self,
        record_id: Uuid,
        reason: &str,
    ) -> anyhow::Result<FailOutcome> {
        let message = clip_error(reason);
        let outcome = self.store.fail(record_id, &message).await?;
        match &outcome {
            FailOutcome::Recorded => {
                warn!(record_id = %record_id, reason = %message, "recorded runtime failure");
            }
            FailOutcome::Guarded => {
                info!(record_id = %record_id, "runtime failure ignored: record is terminal or missing");
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl JobHandler for ContentPipeline {
    fn job_type(&self) -> &'static str {
        GENERATE_CONTENT_JOB
    }

    async fn handle(&self, job: &ClaimedJob) -> Result<(), HandlerError> {
        let payload: GenerateContentJob = serde_json::from_value(job.payload.clone())
            .map_err(HandlerError::InvalidPayload)?;
        self.run(&payload).await?;
        Ok(())
    }
}

#[async_trait]
impl TerminalFailureHook for ContentPipeline {
    async fn on_retries_exhausted(
        &self,
        reference_id: Option<Uuid>,
        reason: &str,
    ) -> anyhow::Result<()> {
        match reference_id {
            Some(record_id) => {
                self.record_runtime_failure(record_id, reason).await?;
            }
            None => {
                warn!(reason = %reason, "dead-lettered job carried no record reference");
            }
        }
        Ok(())
    }
}

/// Truncate a failure message to the storage bound, on a char boundary.
fn clip_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_error_bounds_long_messages() {
        let long = "x".repeat(2000);
        assert_eq!(clip_error(&long).len(), MAX_ERROR_MESSAGE_LEN);
        assert_eq!(clip_error("short"), "short");
    }

    #[test]
    fn clip_error_respects_char_boundaries() {
        let mut s = "x".repeat(MAX_ERROR_MESSAGE_LEN - 1);
        s.push('é');
        s.push_str("tail");
        let clipped = clip_error(&s);
        assert!(clipped.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(clipped.is_char_boundary(clipped.len()));
    }

    #[test]
    fn job_spec_carries_idempotency_and_reference() {
        let job = GenerateContentJob {
            record_id: Uuid::new_v4(),
            source_text: "transcript".into(),
            tenant: "acme".into(),
        };
        let spec = job.spec(3);
        assert_eq!(spec.job_type, GENERATE_CONTENT_JOB);
        assert_eq!(spec.reference_id, Some(job.record_id));
        assert_eq!(
            spec.idempotency_key.as_deref(),
            Some(job.idempotency_key().as_str())
        );
    }
}
