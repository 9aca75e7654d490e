//! Asynchronous content-generation pipeline.
//!
//! Takes a transcript (or a reference to upstream media), drives it through an
//! external generation capability, and lands the result in a shared,
//! concurrently accessed content record while clients poll for progress.
//! Built to survive at-least-once job delivery: claims are atomic conditional
//! writes, slugs are allocated against a unique constraint with deterministic
//! collision suffixes, and every failure path terminates on the record as a
//! `Failed` status plus message.
//!
//! # Architecture
//!
//! - [`record`] - the content record and its lifecycle states
//! - [`store`] - the persistence contract (conditional writes, outcome enums)
//! - [`slug`] - normalization and collision-safe slug allocation
//! - [`generation`] - the external generation-client contract
//! - [`queue`] / [`worker`] - at-least-once job delivery with retry/backoff
//!   and the terminal-failure hook
//! - [`job`] - the orchestration tying it all together
//! - [`progress`] - the polling contract clients observe completion through
//!
//! Postgres-backed stores live in [`postgres`] (feature `postgres`);
//! in-memory stores and a scriptable mock client live in [`testing`]
//! (feature `testing`, always available to this crate's own tests).

pub mod generation;
pub mod job;
pub mod progress;
pub mod queue;
pub mod record;
pub mod slug;
pub mod store;
pub mod worker;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use generation::{GeneratedContent, GenerationClient, GenerationError};
pub use job::{ContentPipeline, GenerateContentJob, RunOutcome, GENERATE_CONTENT_JOB};
pub use progress::{await_terminal, PollError, ProgressView};
pub use queue::{
    ClaimedJob, FailureDisposition, FailureKind, JobQueue, JobSpec, JobStore, RetryPolicy,
};
pub use record::{ContentRecord, ContentSource, ContentStatus, GenerationStage};
pub use slug::{SlugAllocator, SlugError};
pub use store::{ClaimOutcome, CompleteOutcome, ContentStore, FailOutcome, StoreError};
pub use worker::{HandlerError, JobHandler, TerminalFailureHook, Worker, WorkerConfig};
