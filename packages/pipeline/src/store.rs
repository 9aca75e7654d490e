//! Persistence contract for content records.
//!
//! The record is the only shared mutable resource in the pipeline, so every
//! mutating operation here is a *single atomic conditional write*: the store
//! evaluates the guard and applies the change in one round trip. A
//! read-then-write pair is never acceptable - two workers observing `Pending`
//! simultaneously is exactly the race this contract closes.
//!
//! Conditional writes report what happened through small outcome enums rather
//! than errors: a failed claim or a slug collision is an expected branch of
//! the protocol, not a fault. [`StoreError`] is reserved for the backend
//! actually failing.

use async_trait::async_trait;
use uuid::Uuid;

use crate::generation::GeneratedContent;
use crate::record::{ContentRecord, ContentStatus, GenerationStage};

/// Errors from content record storage.
///
/// `Conflict` means a concurrent writer got there first and the caller should
/// re-evaluate; `Backend` means storage itself failed and the enclosing job
/// should bubble the error so the queue retries it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer modified the record since we observed it.
    #[error("record was modified concurrently")]
    Conflict,

    /// Storage backend failed (connection, timeout, serialization).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Result of attempting to claim a record for generation.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// We are the claiming actor; the record is now `InProgress`.
    Claimed(ContentRecord),
    /// The record exists but is not in a claimable state.
    NotClaimable(ContentStatus),
    /// No record with that id. Not an error - deletion between enqueue and
    /// execution is legal.
    NotFound,
}

/// Result of attempting to land generated content plus a slug.
#[derive(Debug, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// Fields, slug, and `Ready` were applied in one write.
    Applied,
    /// The slug is already owned by another record; try the next suffix.
    SlugTaken,
    /// The record is no longer `InProgress`; another actor finished it.
    LostClaim,
}

/// Result of recording a failure.
#[derive(Debug, PartialEq, Eq)]
pub enum FailOutcome {
    Recorded,
    /// The record is missing or already in a pipeline-protected state.
    Guarded,
}

/// Store for content records.
///
/// Implementations must back `complete` with a real uniqueness constraint on
/// `slug` - `SlugTaken` is how a uniqueness violation surfaces to the
/// allocator's retry loop.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Persist a freshly created record.
    async fn insert(&self, record: ContentRecord) -> Result<ContentRecord, StoreError>;

    /// Point read by id. This is the entire polling read contract.
    async fn get(&self, id: Uuid) -> Result<Option<ContentRecord>, StoreError>;

    /// Atomically transition `Pending`/`InProgress` to `InProgress` and stamp
    /// the claim.
    ///
    /// Exactly one of any set of concurrent callers observes `Claimed`.
    /// A `Pending` record is always claimable; an `InProgress` record is
    /// re-claimable only once the previous claim's lease (store-configured)
    /// has expired - that is what lets a redelivered job recover a record a
    /// crashed worker left mid-flight without letting two live workers
    /// process it at once.
    async fn claim(&self, id: Uuid) -> Result<ClaimOutcome, StoreError>;

    /// Record a stage/progress hint. Only applies while `InProgress`; any
    /// other state makes this a silent no-op.
    async fn set_stage(
        &self,
        id: Uuid,
        stage: GenerationStage,
        progress: i16,
    ) -> Result<(), StoreError>;

    /// Cheap existence probe used by the slug allocator to skip taken slugs
    /// before attempting the atomic commit.
    async fn slug_exists(&self, slug: &str) -> Result<bool, StoreError>;

    /// Apply generated fields, assign `slug`, set `Ready`, and clear
    /// `error_message` - all in one conditional write guarded on the record
    /// still being `InProgress` and the slug being free.
    async fn complete(
        &self,
        id: Uuid,
        content: &GeneratedContent,
        slug: &str,
    ) -> Result<CompleteOutcome, StoreError>;

    /// Set `Failed` with a message, clearing stage/progress.
    ///
    /// Guarded against `Ready`/`Published`/`Archived` and missing records.
    /// Overwriting an earlier `Failed` message is allowed (last write wins);
    /// the runtime-exhaustion hook and the in-job failure path converge here.
    async fn fail(&self, id: Uuid, message: &str) -> Result<FailOutcome, StoreError>;
}
