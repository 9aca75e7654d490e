//! In-memory collaborators for tests and embedded use.
//!
//! [`InMemoryContentStore`] and [`InMemoryJobQueue`] implement the full store
//! contracts with the same conditional-write semantics as the Postgres
//! implementations - a single mutex acquisition plays the role of the atomic
//! statement. [`MockGenerationClient`] is scriptable: queue up responses and
//! inspect recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::generation::{GeneratedContent, GenerationClient, GenerationError};
use crate::queue::{
    ClaimedJob, FailureDisposition, FailureKind, JobQueue, JobSpec, JobStore, RetryPolicy,
};
use crate::record::{ContentRecord, ContentStatus, GenerationStage};
use crate::store::{ClaimOutcome, CompleteOutcome, ContentStore, FailOutcome, StoreError};

fn poisoned(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("mutex poisoned: {}", e))
}

// =============================================================================
// In-memory content store
// =============================================================================

/// HashMap-backed [`ContentStore`].
pub struct InMemoryContentStore {
    records: Mutex<HashMap<Uuid, ContentRecord>>,
    claim_lease: Duration,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            claim_lease: Duration::from_secs(10 * 60),
        }
    }
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shrink the claim lease so tests can exercise stale-claim recovery.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Number of stored records; missing-record tests use this to prove the
    /// pipeline created nothing.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn insert(&self, record: ContentRecord) -> Result<ContentRecord, StoreError> {
        let mut records = self.records.lock().map_err(poisoned)?;
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ContentRecord>, StoreError> {
        let records = self.records.lock().map_err(poisoned)?;
        Ok(records.get(&id).cloned())
    }

    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome, StoreError> {
        let mut records = self.records.lock().map_err(poisoned)?;
        let Some(record) = records.get_mut(&id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let claimable = match record.status {
            ContentStatus::Pending => true,
            // A live claim blocks re-claiming until its lease runs out.
            ContentStatus::InProgress => record
                .claimed_at
                .map(|at| at + lease <= now)
                .unwrap_or(true),
            _ => false,
        };
        if !claimable {
            return Ok(ClaimOutcome::NotClaimable(record.status));
        }

        record.status = ContentStatus::InProgress;
        record.claimed_at = Some(now);
        record.updated_at = now;
        Ok(ClaimOutcome::Claimed(record.clone()))
    }

    async fn set_stage(
        &self,
        id: Uuid,
        stage: GenerationStage,
        progress: i16,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(poisoned)?;
        if let Some(record) = records.get_mut(&id) {
            if record.status == ContentStatus::InProgress {
                record.stage = Some(stage);
                record.progress = Some(progress.clamp(0, 100));
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError> {
        let records = self.records.lock().map_err(poisoned)?;
        Ok(records.values().any(|r| r.slug.as_deref() == Some(slug)))
    }

    async fn complete(
        &self,
        id: Uuid,
        content: &GeneratedContent,
        slug: &str,
    ) -> Result<CompleteOutcome, StoreError> {
        let mut records = self.records.lock().map_err(poisoned)?;

        // Uniqueness check and the write happen under one lock, mirroring the
        // unique-constraint guarantee of the SQL implementation.
        if records
            .values()
            .any(|r| r.id != id && r.slug.as_deref() == Some(slug))
        {
            return Ok(CompleteOutcome::SlugTaken);
        }

        let Some(record) = records.get_mut(&id) else {
            return Ok(CompleteOutcome::LostClaim);
        };
        if record.status != ContentStatus::InProgress {
            return Ok(CompleteOutcome::LostClaim);
        }

        record.title = Some(content.title.clone());
        record.body = Some(content.body.clone());
        record.author = Some(content.author.clone());
        record.summary = Some(content.summary.clone());
        record.slug = Some(slug.to_string());
        record.status = ContentStatus::Ready;
        record.stage = None;
        record.progress = None;
        record.error_message = None;
        record.claimed_at = None;
        record.updated_at = Utc::now();
        Ok(CompleteOutcome::Applied)
    }

    async fn fail(&self, id: Uuid, message: &str) -> Result<FailOutcome, StoreError> {
        let mut records = self.records.lock().map_err(poisoned)?;
        let Some(record) = records.get_mut(&id) else {
            return Ok(FailOutcome::Guarded);
        };
        if record.status.is_pipeline_protected() {
            return Ok(FailOutcome::Guarded);
        }
        record.status = ContentStatus::Failed;
        record.error_message = Some(message.to_string());
        record.stage = None;
        record.progress = None;
        record.claimed_at = None;
        record.updated_at = Utc::now();
        Ok(FailOutcome::Recorded)
    }
}

// =============================================================================
// In-memory job queue + store
// =============================================================================

/// Lifecycle state of a stored job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Dead,
}

#[derive(Debug, Clone)]
struct StoredJob {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    state: JobState,
    retry_count: i32,
    max_retries: i32,
    next_run_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    idempotency_key: Option<String>,
    reference_id: Option<Uuid>,
    error_message: Option<String>,
}

/// At-least-once in-memory queue implementing both [`JobQueue`] and
/// [`JobStore`].
pub struct InMemoryJobQueue {
    jobs: Mutex<HashMap<Uuid, StoredJob>>,
    policy: RetryPolicy,
    claim_lease: Duration,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl InMemoryJobQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            policy,
            claim_lease: Duration::from_secs(10 * 60),
        }
    }

    /// Shrink the job claim lease so tests can exercise crashed-worker
    /// redelivery.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn job_state(&self, id: Uuid) -> Option<JobState> {
        self.jobs.lock().ok()?.get(&id).map(|j| j.state)
    }

    pub fn job_error(&self, id: Uuid) -> Option<String> {
        self.jobs.lock().ok()?.get(&id).and_then(|j| j.error_message.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.jobs
            .lock()
            .map(|jobs| {
                jobs.values()
                    .filter(|j| j.state == JobState::Pending)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Collapse backoff so the next tick picks the job up immediately.
    pub fn make_ready_now(&self, id: Uuid) {
        if let Ok(mut jobs) = self.jobs.lock() {
            if let Some(job) = jobs.get_mut(&id) {
                job.next_run_at = Utc::now();
            }
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> anyhow::Result<Uuid> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))?;

        if let Some(key) = &spec.idempotency_key {
            if let Some(existing) = jobs.values().find(|j| {
                j.idempotency_key.as_deref() == Some(key.as_str())
                    && matches!(j.state, JobState::Pending | JobState::Running)
            }) {
                tracing::debug!(job_id = %existing.id, idempotency_key = %key, "found existing job with idempotency key");
                return Ok(existing.id);
            }
        }

        let job = StoredJob {
            id: Uuid::new_v4(),
            job_type: spec.job_type.to_string(),
            payload,
            state: JobState::Pending,
            retry_count: 0,
            max_retries: spec.max_retries,
            next_run_at: Utc::now(),
            last_run_at: None,
            idempotency_key: spec.idempotency_key,
            reference_id: spec.reference_id,
            error_message: None,
        };
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }
}

#[async_trait]
impl JobStore for InMemoryJobQueue {
    async fn claim_ready(&self, _worker_id: &str, limit: i64) -> anyhow::Result<Vec<ClaimedJob>> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))?;
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));

        // A running job whose claim stamp predates the lease cutoff belongs
        // to a worker that died mid-job; reclaiming it is the redelivery.
        let mut ready: Vec<Uuid> = jobs
            .values()
            .filter(|j| match j.state {
                JobState::Pending => j.next_run_at <= now,
                JobState::Running => j
                    .last_run_at
                    .map(|at| at + lease <= now)
                    .unwrap_or(true),
                _ => false,
            })
            .map(|j| j.id)
            .collect();
        // Oldest first, stable across ticks.
        ready.sort_by_key(|id| jobs[id].next_run_at);
        ready.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            let job = jobs.get_mut(&id).expect("job just selected");
            job.state = JobState::Running;
            job.last_run_at = Some(now);
            claimed.push(ClaimedJob {
                id: job.id,
                job_type: job.job_type.clone(),
                payload: job.payload.clone(),
                attempt: job.retry_count + 1,
                max_retries: job.max_retries,
                reference_id: job.reference_id,
            });
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> anyhow::Result<()> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))?;
        if let Some(job) = jobs.get_mut(&job_id) {
            job.state = JobState::Succeeded;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> anyhow::Result<FailureDisposition> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {}", e))?;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("no such job: {}", job_id))?;

        job.error_message = Some(error.to_string());

        if kind == FailureKind::NonRetryable {
            job.state = JobState::Dead;
            return Ok(FailureDisposition::DeadLettered);
        }

        job.retry_count += 1;
        if job.retry_count > job.max_retries {
            job.state = JobState::Dead;
            return Ok(FailureDisposition::DeadLettered);
        }

        let delay = self.policy.delay_for(job.retry_count);
        let next_run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
        job.state = JobState::Pending;
        job.next_run_at = next_run_at;
        Ok(FailureDisposition::Scheduled { next_run_at })
    }
}

// =============================================================================
// Mock generation client
// =============================================================================

enum ScriptedResponse {
    Content(GeneratedContent),
    ApiError(String),
}

/// Scriptable [`GenerationClient`] that records its calls.
///
/// With no scripted responses it returns deterministic placeholder content,
/// so happy-path tests need no setup.
#[derive(Default)]
pub struct MockGenerationClient {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl MockGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(self, content: GeneratedContent) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(ScriptedResponse::Content(content));
        self
    }

    pub fn with_api_error(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(ScriptedResponse::ApiError(message.to_string()));
        self
    }

    /// Make every call sleep first; combine with a short pipeline timeout to
    /// exercise the deadline path.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(source_text, tenant)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn generate(
        &self,
        source_text: &str,
        tenant: &str,
    ) -> Result<GeneratedContent, GenerationError> {
        self.calls
            .lock()
            .unwrap()
            .push((source_text.to_string(), tenant.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(ScriptedResponse::Content(content)) => Ok(content),
            Some(ScriptedResponse::ApiError(message)) => Err(GenerationError::Api(message)),
            None => Ok(GeneratedContent {
                title: "Generated Title".to_string(),
                body: format!("Generated body for: {}", source_text),
                author: "Editorial Desk".to_string(),
                summary: "Generated summary.".to_string(),
                slug_candidate: None,
            }),
        }
    }
}
