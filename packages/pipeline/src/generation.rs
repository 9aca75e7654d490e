//! Generation client contract.
//!
//! The remote capability that turns raw source text into structured content
//! fields is a black box behind [`GenerationClient`]. The pipeline never
//! inspects a successful response beyond structural completeness, and any
//! latency, partial output, or malformed payload surfaces as a single
//! [`GenerationError`] handed to the job's failure path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors from the generation capability.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Configuration error (missing API key, unknown tenant profile).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, transport timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response, rate limit, invalid request).
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (invalid JSON, unexpected response shape).
    #[error("Parse error: {0}")]
    Parse(String),

    /// The response arrived but is structurally incomplete.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The caller-supplied deadline elapsed before a response arrived.
    #[error("Generation timed out after {0}s")]
    TimedOut(u64),
}

/// Structured content produced by the generation capability.
///
/// Fixed shape on purpose: a loosely typed field bag would let malformed
/// upstream responses leak past the boundary. Required fields are checked by
/// [`GeneratedContent::validated`] before the pipeline accepts the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub title: String,
    pub body: String,
    pub author: String,
    pub summary: String,
    /// Optional explicit slug base; the allocator falls back to the title.
    #[serde(default)]
    pub slug_candidate: Option<String>,
}

impl GeneratedContent {
    /// Structural completeness check: non-empty title and body.
    ///
    /// This is the only validation the pipeline performs on a successful
    /// response; editorial quality is not its concern.
    pub fn validated(self) -> Result<Self, GenerationError> {
        if self.title.trim().is_empty() {
            return Err(GenerationError::Malformed("empty title".into()));
        }
        if self.body.trim().is_empty() {
            return Err(GenerationError::Malformed("empty body".into()));
        }
        Ok(self)
    }

    /// The base string the slug allocator should start from.
    pub fn slug_base(&self) -> &str {
        self.slug_candidate
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.title)
    }
}

/// External capability converting source text into structured content fields.
///
/// Implementations must be callable concurrently and should not retry
/// internally: retry policy belongs to the job queue.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate content fields from `source_text` using the configuration
    /// selected by `tenant`.
    async fn generate(
        &self,
        source_text: &str,
        tenant: &str,
    ) -> Result<GeneratedContent, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(title: &str, body: &str) -> GeneratedContent {
        GeneratedContent {
            title: title.into(),
            body: body.into(),
            author: "Editorial Desk".into(),
            summary: "A summary.".into(),
            slug_candidate: None,
        }
    }

    #[test]
    fn validated_accepts_complete_content() {
        assert!(content("A Title", "A body.").validated().is_ok());
    }

    #[test]
    fn validated_rejects_blank_title_or_body() {
        assert!(matches!(
            content("  ", "A body.").validated(),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            content("A Title", "").validated(),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn slug_base_prefers_explicit_candidate() {
        let mut c = content("Fallback Title", "body");
        assert_eq!(c.slug_base(), "Fallback Title");

        c.slug_candidate = Some("explicit-base".into());
        assert_eq!(c.slug_base(), "explicit-base");

        // Whitespace-only candidates do not count.
        c.slug_candidate = Some("   ".into());
        assert_eq!(c.slug_base(), "Fallback Title");
    }
}
