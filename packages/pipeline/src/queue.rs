//! Job queue and job store contracts.
//!
//! The queue is an injected collaborator, not ambient infrastructure: the
//! pipeline's logic is unit-testable without a live queue, and retry/backoff
//! policy lives entirely on this side of the seam. Delivery is at-least-once -
//! a job may be redelivered after a worker crash or enqueued twice - and the
//! record claim protocol is what makes that safe, not the queue.
//!
//! Two traits split the producer and consumer sides:
//! - [`JobQueue`] - enqueue work (with idempotent-enqueue support)
//! - [`JobStore`] - claim ready jobs atomically, ack, and fail with
//!   retry classification

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Declarative description of a job at enqueue time.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Handler lookup key, e.g. `"content:generate"`.
    pub job_type: &'static str,
    /// Retries allowed after the first attempt before dead-lettering.
    pub max_retries: i32,
    /// If set, enqueueing is a no-op while a pending/running job with the
    /// same key exists; the existing job's id is returned instead.
    pub idempotency_key: Option<String>,
    /// Domain entity this job operates on. The terminal-failure hook needs it
    /// to land a status write when the retry budget runs out.
    pub reference_id: Option<Uuid>,
}

impl JobSpec {
    pub fn new(job_type: &'static str) -> Self {
        Self {
            job_type,
            max_retries: 3,
            idempotency_key: None,
            reference_id: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_reference_id(mut self, id: Uuid) -> Self {
        self.reference_id = Some(id);
        self
    }
}

/// Producer side: submit jobs for asynchronous execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for execution as soon as a worker is free.
    ///
    /// Returns the job id - either freshly created or, when the spec carries
    /// an idempotency key that matches a live job, the existing one.
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid>;
}

/// A job claimed by a worker, ready for execution.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// 1-based attempt number; first retry is attempt 2.
    pub attempt: i32,
    pub max_retries: i32,
    pub reference_id: Option<Uuid>,
}

/// Classification of job failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Possibly transient (backend unavailable, network); retry with backoff.
    Retryable,
    /// Permanent (unknown job type, invalid payload); dead-letter immediately.
    NonRetryable,
}

/// What the store did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Requeued for another attempt at `next_run_at`.
    Scheduled { next_run_at: DateTime<Utc> },
    /// Out of budget (or non-retryable); the worker must now invoke the
    /// terminal-failure hook for the job's reference entity.
    DeadLettered,
}

/// Consumer side: atomic claiming plus completion bookkeeping.
///
/// `claim_ready` must be a single atomic operation (`FOR UPDATE SKIP LOCKED`
/// in Postgres, a locked scan in memory) so that two workers never execute
/// the same delivery.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claim up to `limit` ready jobs for this worker.
    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedJob>>;

    /// Mark a job as succeeded.
    async fn mark_succeeded(&self, job_id: Uuid) -> Result<()>;

    /// Record a failure and decide the job's fate.
    ///
    /// Retryable failures increment the retry count and reschedule with
    /// exponential backoff until the budget is spent; non-retryable failures
    /// dead-letter at once.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> Result<FailureDisposition>;
}

/// Exponential backoff schedule for retryable failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based): base * 2^(retry - 1), capped.
    pub fn delay_for(&self, retry: i32) -> Duration {
        let exp = retry.saturating_sub(1).clamp(0, 30) as u32;
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_sets_fields() {
        let id = Uuid::new_v4();
        let spec = JobSpec::new("content:generate")
            .with_max_retries(5)
            .with_idempotency_key("content:generate:abc")
            .with_reference_id(id);

        assert_eq!(spec.job_type, "content:generate");
        assert_eq!(spec.max_retries, 5);
        assert_eq!(spec.idempotency_key.as_deref(), Some("content:generate:abc"));
        assert_eq!(spec.reference_id, Some(id));
    }

    #[test]
    fn retry_policy_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for(30), Duration::from_secs(60));
    }

    #[test]
    fn retry_policy_tolerates_zero_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), policy.base_delay);
    }
}
