//! HTTP surface and runtime wiring for the content-generation pipeline.
//!
//! The `pipeline` crate owns the semantics; this crate owns the edges - the
//! Axum API clients submit to and poll against, the OpenAI-backed generation
//! client, configuration, and the binary that wires Postgres stores, the
//! worker, and the server together.

pub mod app;
pub mod config;
pub mod openai;
pub mod routes;

pub use app::{build_app, AppState};
pub use config::Config;
pub use openai::{OpenAiGenerationClient, TenantProfile};
