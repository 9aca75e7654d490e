//! Polling contract for observing pipeline progress.
//!
//! There is no push channel: a client re-fetches the record at a fixed
//! interval while it is in flight and stops on any terminal status. The
//! [`ProgressView`] is the serializable shape of one such read - status,
//! typed stage/progress hints, whatever content fields exist so far, and the
//! error message once failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{ContentRecord, ContentStatus, GenerationStage};
use crate::store::{ContentStore, StoreError};

/// One polled observation of a content record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressView {
    pub id: Uuid,
    pub status: ContentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<GenerationStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&ContentRecord> for ProgressView {
    fn from(record: &ContentRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            stage: record.stage,
            progress: record.progress,
            title: record.title.clone(),
            body: record.body.clone(),
            author: record.author.clone(),
            summary: record.summary.clone(),
            slug: record.slug.clone(),
            error_message: record.error_message.clone(),
        }
    }
}

impl ProgressView {
    /// A client keeps polling exactly while this is true.
    pub fn in_flight(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Errors from [`await_terminal`].
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("record {0} not found")]
    NotFound(Uuid),

    #[error("record {id} still {status} after {waited:?}")]
    DeadlineElapsed {
        id: Uuid,
        status: ContentStatus,
        waited: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Poll `store` at `interval` until the record leaves its in-flight states,
/// or `deadline` elapses.
///
/// This is a convenience for embedded consumers and tests; HTTP clients
/// implement the same loop against the point-read endpoint.
pub async fn await_terminal<S: ContentStore + ?Sized>(
    store: &S,
    id: Uuid,
    interval: Duration,
    deadline: Duration,
) -> Result<ContentRecord, PollError> {
    let started = tokio::time::Instant::now();

    loop {
        let record = store.get(id).await?.ok_or(PollError::NotFound(id))?;

        if record.status.is_terminal() {
            return Ok(record);
        }

        if started.elapsed() >= deadline {
            return Err(PollError::DeadlineElapsed {
                id,
                status: record.status,
                waited: started.elapsed(),
            });
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ContentSource;
    use crate::testing::InMemoryContentStore;
    use std::sync::Arc;

    fn pending_record() -> ContentRecord {
        ContentRecord::new(
            "acme",
            ContentSource::Transcript {
                text: "hello".into(),
            },
        )
    }

    #[test]
    fn view_reflects_record_fields() {
        let mut record = pending_record();
        record.status = ContentStatus::Failed;
        record.error_message = Some("API error".into());

        let view = ProgressView::from(&record);
        assert_eq!(view.status, ContentStatus::Failed);
        assert_eq!(view.error_message.as_deref(), Some("API error"));
        assert!(!view.in_flight());
    }

    #[test]
    fn view_omits_absent_fields_in_json() {
        let record = pending_record();
        let json = serde_json::to_value(ProgressView::from(&record)).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("error_message").is_none());
        assert!(json.get("slug").is_none());
    }

    #[tokio::test]
    async fn await_terminal_stops_on_failure_status() {
        let store = Arc::new(InMemoryContentStore::new());
        let record = pending_record();
        let id = record.id;
        store.insert(record).await.unwrap();

        // Finish the record from a second task while the poller waits.
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.fail(id, "boom").await.unwrap();
        });

        let record = await_terminal(
            store.as_ref(),
            id,
            Duration::from_millis(10),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(record.status, ContentStatus::Failed);
    }

    #[tokio::test]
    async fn await_terminal_reports_missing_record() {
        let store = InMemoryContentStore::new();
        let err = await_terminal(
            &store,
            Uuid::new_v4(),
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::NotFound(_)));
    }

    #[tokio::test]
    async fn await_terminal_gives_up_at_deadline() {
        let store = InMemoryContentStore::new();
        let record = pending_record();
        let id = record.id;
        store.insert(record).await.unwrap();

        let err = await_terminal(
            &store,
            id,
            Duration::from_millis(5),
            Duration::from_millis(30),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::DeadlineElapsed { .. }));
    }
}
