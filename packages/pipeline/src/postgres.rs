//! Postgres-backed content and job stores.
//!
//! Every conditional write in the contracts maps to a single SQL statement:
//! the claim is one guarded `UPDATE`, completion rides the unique index on
//! `slug` (a violation surfaces as `SlugTaken`, never as a caller error), and
//! job claiming uses `FOR UPDATE SKIP LOCKED` so two workers cannot take the
//! same delivery.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::generation::GeneratedContent;
use crate::queue::{
    ClaimedJob, FailureDisposition, FailureKind, JobQueue, JobSpec, JobStore, RetryPolicy,
};
use crate::record::{ContentRecord, ContentStatus, GenerationStage};
use crate::store::{ClaimOutcome, CompleteOutcome, ContentStore, FailOutcome, StoreError};

// =============================================================================
// Content store
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ContentRecordRow {
    id: Uuid,
    tenant: String,
    status: String,
    stage: Option<String>,
    progress: Option<i16>,
    title: Option<String>,
    body: Option<String>,
    author: Option<String>,
    summary: Option<String>,
    slug: Option<String>,
    error_message: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    source: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContentRecordRow> for ContentRecord {
    type Error = StoreError;

    fn try_from(row: ContentRecordRow) -> Result<Self, StoreError> {
        let status: ContentStatus = row
            .status
            .parse()
            .map_err(|e: String| StoreError::Backend(anyhow::anyhow!(e)))?;
        let stage = row
            .stage
            .map(|s| s.parse::<GenerationStage>())
            .transpose()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let source = serde_json::from_value(row.source)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("invalid source column: {}", e)))?;

        Ok(ContentRecord {
            id: row.id,
            tenant: row.tenant,
            status,
            stage,
            progress: row.progress,
            title: row.title,
            body: row.body,
            author: row.author,
            summary: row.summary,
            slug: row.slug,
            error_message: row.error_message,
            claimed_at: row.claimed_at,
            source,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// [`ContentStore`] backed by the `content_records` table.
pub struct PgContentStore {
    pool: PgPool,
    claim_lease: Duration,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_lease: Duration::from_secs(10 * 60),
        }
    }

    /// How long a claim blocks re-claiming. Should comfortably exceed the
    /// generation timeout.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn insert(&self, record: ContentRecord) -> Result<ContentRecord, StoreError> {
        let source = serde_json::to_value(&record.source)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let row = sqlx::query_as::<_, ContentRecordRow>(
            r#"
            INSERT INTO content_records (
                id, tenant, status, stage, progress, title, body, author,
                summary, slug, error_message, claimed_at, source,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant)
        .bind(record.status.as_str())
        .bind(record.stage.map(|s| s.as_str()))
        .bind(record.progress)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.author)
        .bind(&record.summary)
        .bind(&record.slug)
        .bind(&record.error_message)
        .bind(record.claimed_at)
        .bind(source)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<ContentRecord>, StoreError> {
        let row = sqlx::query_as::<_, ContentRecordRow>(
            "SELECT * FROM content_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome, StoreError> {
        let lease_cutoff = Utc::now()
            - chrono::Duration::from_std(self.claim_lease)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));

        let row = sqlx::query_as::<_, ContentRecordRow>(
            r#"
            UPDATE content_records
            SET status = 'in_progress', claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND (
                    status = 'pending'
                 OR (status = 'in_progress'
                     AND (claimed_at IS NULL OR claimed_at < $2))
              )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(lease_cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if let Some(row) = row {
            return Ok(ClaimOutcome::Claimed(row.try_into()?));
        }

        // The conditional write already decided; this read is only to report
        // which guard blocked us.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM content_records WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;

        match status {
            None => Ok(ClaimOutcome::NotFound),
            Some(s) => {
                let status = s
                    .parse()
                    .map_err(|e: String| StoreError::Backend(anyhow::anyhow!(e)))?;
                Ok(ClaimOutcome::NotClaimable(status))
            }
        }
    }

    async fn set_stage(
        &self,
        id: Uuid,
        stage: GenerationStage,
        progress: i16,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE content_records
            SET stage = $2, progress = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(stage.as_str())
        .bind(progress.clamp(0, 100))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM content_records WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))
    }

    async fn complete(
        &self,
        id: Uuid,
        content: &GeneratedContent,
        slug: &str,
    ) -> Result<CompleteOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE content_records
            SET title = $2, body = $3, author = $4, summary = $5, slug = $6,
                status = 'ready', error_message = NULL, stage = NULL,
                progress = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(&content.title)
        .bind(&content.body)
        .bind(&content.author)
        .bind(&content.summary)
        .bind(slug)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(CompleteOutcome::Applied),
            Ok(_) => Ok(CompleteOutcome::LostClaim),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                debug!(record_id = %id, slug = %slug, "slug already taken");
                Ok(CompleteOutcome::SlugTaken)
            }
            Err(e) => Err(StoreError::Backend(e.into())),
        }
    }

    async fn fail(&self, id: Uuid, message: &str) -> Result<FailOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE content_records
            SET status = 'failed', error_message = $2, stage = NULL,
                progress = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('ready', 'published', 'archived')
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 1 {
            Ok(FailOutcome::Recorded)
        } else {
            Ok(FailOutcome::Guarded)
        }
    }
}

// =============================================================================
// Job queue + store
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    retry_count: i32,
    max_retries: i32,
    reference_id: Option<Uuid>,
}

/// [`JobQueue`] and [`JobStore`] backed by the `jobs` table.
pub struct PgJobStore {
    pool: PgPool,
    policy: RetryPolicy,
    claim_lease: Duration,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: RetryPolicy::default(),
            claim_lease: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// How long a `running` job stays off-limits before another worker may
    /// reclaim it. Must comfortably exceed the longest handler execution;
    /// redelivery after this cutoff is what makes delivery at-least-once when
    /// a worker dies mid-job.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    async fn find_live_by_idempotency_key(&self, key: &str) -> anyhow::Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM jobs
            WHERE idempotency_key = $1 AND status IN ('pending', 'running')
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for PgJobStore {
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> anyhow::Result<Uuid> {
        if let Some(key) = &spec.idempotency_key {
            if let Some(existing) = self.find_live_by_idempotency_key(key).await? {
                debug!(job_id = %existing, idempotency_key = %key, "found existing job with idempotency key");
                return Ok(existing);
            }
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, status, job_type, payload, retry_count, max_retries,
                next_run_at, idempotency_key, reference_id, created_at, updated_at
            )
            VALUES ($1, 'pending', $2, $3, 0, $4, NOW(), $5, $6, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(spec.job_type)
        .bind(&payload)
        .bind(spec.max_retries)
        .bind(&spec.idempotency_key)
        .bind(spec.reference_id)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %id, job_type = %spec.job_type, "enqueued job");
        Ok(id)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_ready(&self, worker_id: &str, limit: i64) -> anyhow::Result<Vec<ClaimedJob>> {
        let lease_cutoff = Utc::now()
            - chrono::Duration::from_std(self.claim_lease)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));

        // A `running` job whose claim stamp predates the lease cutoff belongs
        // to a worker that died mid-job; reclaiming it is the redelivery.
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            WITH ready AS (
                SELECT id FROM jobs
                WHERE (status = 'pending' AND next_run_at <= NOW())
                   OR (status = 'running'
                       AND (last_run_at IS NULL OR last_run_at < $3))
                ORDER BY next_run_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs j
            SET status = 'running', claimed_by = $1, last_run_at = NOW(), updated_at = NOW()
            FROM ready
            WHERE j.id = ready.id
            RETURNING j.id, j.job_type, j.payload, j.retry_count, j.max_retries, j.reference_id
            "#,
        )
        .bind(worker_id)
        .bind(limit)
        .bind(lease_cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedJob {
                id: row.id,
                job_type: row.job_type,
                payload: row.payload,
                attempt: row.retry_count + 1,
                max_retries: row.max_retries,
                reference_id: row.reference_id,
            })
            .collect())
    }

    async fn mark_succeeded(&self, job_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET status = 'succeeded', updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        kind: FailureKind,
    ) -> anyhow::Result<FailureDisposition> {
        let retryable = kind == FailureKind::Retryable;
        let base_secs = self.policy.base_delay.as_secs_f64();
        let max_secs = self.policy.max_delay.as_secs_f64();

        // One statement decides retry-vs-dead from the row's own counters, so
        // concurrent bookkeeping cannot double-count an attempt.
        let (status, next_run_at): (String, DateTime<Utc>) = sqlx::query_as(
            r#"
            UPDATE jobs
            SET error_message = $2,
                retry_count = CASE WHEN $3 THEN retry_count + 1 ELSE retry_count END,
                status = CASE
                    WHEN $3 AND retry_count + 1 <= max_retries THEN 'pending'
                    ELSE 'dead'
                END,
                next_run_at = CASE
                    WHEN $3 AND retry_count + 1 <= max_retries
                    THEN NOW() + make_interval(secs => LEAST($4 * power(2, retry_count), $5))
                    ELSE next_run_at
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING status, next_run_at
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(retryable)
        .bind(base_secs)
        .bind(max_secs)
        .fetch_one(&self.pool)
        .await?;

        if status == "pending" {
            Ok(FailureDisposition::Scheduled { next_run_at })
        } else {
            Ok(FailureDisposition::DeadLettered)
        }
    }
}
