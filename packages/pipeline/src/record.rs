//! Content records and their lifecycle.
//!
//! A [`ContentRecord`] is the unit the pipeline produces. It is created in
//! `Pending` when a generation request is accepted, claimed into `InProgress`
//! by exactly one pipeline job, and lands in `Ready` or `Failed`. From `Ready`
//! a user may move it through `Published`/`Archived`; the pipeline never
//! touches a record once it has left `InProgress`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Accepted, waiting to be claimed by a pipeline job.
    Pending,
    /// Claimed by exactly one pipeline job.
    InProgress,
    /// Generation succeeded; fields are fully populated.
    Ready,
    /// User-published; out of the pipeline's hands.
    Published,
    /// User-archived; out of the pipeline's hands.
    Archived,
    /// Generation failed; `error_message` explains why.
    Failed,
}

impl ContentStatus {
    /// A pipeline job may only claim records in these states.
    ///
    /// `InProgress` is included so a redelivered job can re-claim after a
    /// worker crash left the record mid-flight; stores additionally require
    /// the previous claim's lease to have expired before allowing that.
    pub fn is_claimable(&self) -> bool {
        matches!(self, ContentStatus::Pending | ContentStatus::InProgress)
    }

    /// States the pipeline is forbidden from ever writing over.
    pub fn is_pipeline_protected(&self) -> bool {
        matches!(
            self,
            ContentStatus::Ready | ContentStatus::Published | ContentStatus::Archived
        )
    }

    /// A polling client stops on anything that is not `InProgress` or `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContentStatus::Pending | ContentStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::InProgress => "in_progress",
            ContentStatus::Ready => "ready",
            ContentStatus::Published => "published",
            ContentStatus::Archived => "archived",
            ContentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContentStatus::Pending),
            "in_progress" => Ok(ContentStatus::InProgress),
            "ready" => Ok(ContentStatus::Ready),
            "published" => Ok(ContentStatus::Published),
            "archived" => Ok(ContentStatus::Archived),
            "failed" => Ok(ContentStatus::Failed),
            other => Err(format!("unknown content status: {}", other)),
        }
    }
}

/// Coarse progress marker set by upstream stages while a record is
/// `InProgress`.
///
/// This replaces the old habit of smuggling progress hints into the title
/// text: the stage is an explicit typed field the polling contract can rely
/// on, paired with a numeric percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Downloading,
    Transcribing,
    Generating,
}

impl GenerationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStage::Downloading => "downloading",
            GenerationStage::Transcribing => "transcribing",
            GenerationStage::Generating => "generating",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "downloading" => Ok(GenerationStage::Downloading),
            "transcribing" => Ok(GenerationStage::Transcribing),
            "generating" => Ok(GenerationStage::Generating),
            other => Err(format!("unknown generation stage: {}", other)),
        }
    }
}

/// Originating material for a record.
///
/// Opaque to the pipeline beyond being handed to the generation client; the
/// discriminant exists so the application can show where content came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSource {
    /// Raw transcript text submitted directly.
    Transcript { text: String },
    /// Previously uploaded media, referenced by id.
    Upload { media_id: Uuid },
    /// External media URL to be fetched and transcribed upstream.
    Url { url: String },
}

/// The persistent unit being produced and mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    /// Opaque tenant/brand tag selecting the generation configuration.
    pub tenant: String,
    pub status: ContentStatus,
    /// Set only while `InProgress`; cleared on any terminal transition.
    pub stage: Option<GenerationStage>,
    /// Rough percentage hint for the current stage, 0..=100.
    pub progress: Option<i16>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    /// Globally unique, URL-safe identifier. Immutable once assigned by the
    /// pipeline.
    pub slug: Option<String>,
    /// Populated only when `status` is `Failed`.
    pub error_message: Option<String>,
    /// When the current pipeline claim was taken; arbitrates re-claims after
    /// a worker crash (see [`crate::store::ContentStore::claim`]).
    pub claimed_at: Option<DateTime<Utc>>,
    pub source: ContentSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    /// Create a fresh `Pending` record for an accepted generation request.
    pub fn new(tenant: impl Into<String>, source: ContentSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            status: ContentStatus::Pending,
            stage: None,
            progress: None,
            title: None,
            body: None,
            author: None,
            summary: None,
            slug: None,
            error_message: None,
            claimed_at: None,
            source,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ContentStatus::Pending,
            ContentStatus::InProgress,
            ContentStatus::Ready,
            ContentStatus::Published,
            ContentStatus::Archived,
            ContentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ContentStatus>(), Ok(status));
        }
        assert!("draft".parse::<ContentStatus>().is_err());
    }

    #[test]
    fn claimable_and_protected_sets_partition_the_states() {
        assert!(ContentStatus::Pending.is_claimable());
        assert!(ContentStatus::InProgress.is_claimable());
        assert!(!ContentStatus::Ready.is_claimable());
        assert!(!ContentStatus::Failed.is_claimable());

        assert!(ContentStatus::Ready.is_pipeline_protected());
        assert!(ContentStatus::Published.is_pipeline_protected());
        assert!(ContentStatus::Archived.is_pipeline_protected());
        // Failed stays writable so the terminal hook can land a runtime reason.
        assert!(!ContentStatus::Failed.is_pipeline_protected());
    }

    #[test]
    fn source_serializes_with_kind_tag() {
        let source = ContentSource::Url {
            url: "https://example.org/talk".into(),
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["kind"], "url");

        let back: ContentSource = serde_json::from_value(json).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn new_record_starts_pending_and_empty() {
        let record = ContentRecord::new(
            "acme",
            ContentSource::Transcript {
                text: "hello".into(),
            },
        );
        assert_eq!(record.status, ContentStatus::Pending);
        assert!(record.slug.is_none());
        assert!(record.error_message.is_none());
        assert!(record.stage.is_none());
    }
}
