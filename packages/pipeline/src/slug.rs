//! Slug derivation and collision-safe allocation.
//!
//! Slugs are derived from a candidate base (usually the generated title),
//! normalized to lower-case ASCII hyphenation, and made unique by appending
//! `-1`, `-2`, … in ascending order. The sequence is deterministic - for N
//! colliding bases the assigned slugs are exactly `base`, `base-1`, …,
//! `base-(N-1)`.
//!
//! Commitment is delegated to [`ContentStore::complete`], which performs the
//! atomic write against the store's unique slug constraint. The existence
//! probe is only an optimization to skip obviously taken suffixes; a race
//! between two allocators converging on the same candidate is resolved by the
//! constraint, surfacing here as `SlugTaken`, and the loop advances.

use uuid::Uuid;

use crate::generation::GeneratedContent;
use crate::store::{CompleteOutcome, ContentStore, StoreError};

/// Default bound on the collision-retry loop.
///
/// Practically unreachable, but exhaustion must be a checked path rather than
/// an infinite loop.
pub const DEFAULT_MAX_ATTEMPTS: usize = 200;

/// Errors from slug allocation.
#[derive(Debug, thiserror::Error)]
pub enum SlugError {
    /// No free suffix found within the attempt budget.
    #[error("slug allocation exhausted after {attempts} attempts for base '{base}'")]
    Exhausted { base: String, attempts: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the allocator managed to do.
#[derive(Debug)]
pub enum AllocationOutcome {
    /// Content and slug were committed; the record is `Ready`.
    Applied { slug: String },
    /// The record left `InProgress` under us; nothing was written.
    LostClaim,
}

/// Normalize a candidate base to a URL-safe slug fragment.
///
/// Lower-cases, replaces every non-alphanumeric ASCII run with a single
/// hyphen, and trims leading/trailing hyphens. Non-ASCII characters are
/// dropped. An input that normalizes to nothing yields `"untitled"`.
pub fn normalize(base: &str) -> String {
    let mut slug = String::with_capacity(base.len());
    let mut pending_hyphen = false;

    for ch in base.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii() {
            pending_hyphen = true;
        }
        // Non-ASCII: dropped without forcing a separator.
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// The nth candidate for a normalized base: `base`, then `base-1`, `base-2`, …
fn candidate(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

/// Allocates unique slugs and commits generated content under them.
#[derive(Debug, Clone)]
pub struct SlugAllocator {
    max_attempts: usize,
}

impl Default for SlugAllocator {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SlugAllocator {
    pub fn new(max_attempts: usize) -> Self {
        assert!(max_attempts > 0, "slug attempt budget must be positive");
        Self { max_attempts }
    }

    /// Find the first free suffix for `content`'s slug base and atomically
    /// land the generated fields under it.
    ///
    /// The probe-then-commit pair is race-safe: if another record takes the
    /// candidate between the probe and the commit, the unique constraint
    /// reports `SlugTaken` and the loop moves to the next suffix instead of
    /// failing the caller.
    pub async fn allocate_and_complete<S: ContentStore + ?Sized>(
        &self,
        store: &S,
        record_id: Uuid,
        content: &GeneratedContent,
    ) -> Result<AllocationOutcome, SlugError> {
        let base = normalize(content.slug_base());

        for attempt in 0..self.max_attempts {
            let slug = candidate(&base, attempt);

            if store.slug_exists(&slug).await? {
                continue;
            }

            match store.complete(record_id, content, &slug).await? {
                CompleteOutcome::Applied => {
                    tracing::debug!(record_id = %record_id, slug = %slug, attempt, "slug allocated");
                    return Ok(AllocationOutcome::Applied { slug });
                }
                CompleteOutcome::SlugTaken => continue,
                CompleteOutcome::LostClaim => return Ok(AllocationOutcome::LostClaim),
            }
        }

        Err(SlugError::Exhausted {
            base,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContentRecord, ContentSource};
    use crate::testing::InMemoryContentStore;

    fn content(title: &str) -> GeneratedContent {
        GeneratedContent {
            title: title.into(),
            body: "Body.".into(),
            author: "Desk".into(),
            summary: "Summary.".into(),
            slug_candidate: None,
        }
    }

    async fn claimed_record(store: &InMemoryContentStore) -> Uuid {
        let record = ContentRecord::new(
            "acme",
            ContentSource::Transcript {
                text: "hello".into(),
            },
        );
        let id = record.id;
        store.insert(record).await.unwrap();
        store.claim(id).await.unwrap();
        id
    }

    #[test]
    fn normalize_lowercases_and_hyphenates() {
        assert_eq!(normalize("Hello, World!"), "hello-world");
        assert_eq!(normalize("  Spaced   Out  "), "spaced-out");
        assert_eq!(normalize("Already-fine-123"), "already-fine-123");
    }

    #[test]
    fn normalize_drops_non_ascii_and_handles_empty() {
        assert_eq!(normalize("Caf\u{e9} au lait"), "caf-au-lait");
        assert_eq!(normalize("!!!"), "untitled");
        assert_eq!(normalize(""), "untitled");
    }

    #[test]
    fn candidates_are_deterministic() {
        assert_eq!(candidate("base", 0), "base");
        assert_eq!(candidate("base", 1), "base-1");
        assert_eq!(candidate("base", 7), "base-7");
    }

    #[tokio::test]
    async fn colliding_titles_get_ascending_suffixes() {
        let store = InMemoryContentStore::new();
        let allocator = SlugAllocator::default();

        let mut slugs = Vec::new();
        for _ in 0..4 {
            let id = claimed_record(&store).await;
            let outcome = allocator
                .allocate_and_complete(&store, id, &content("Launch Week"))
                .await
                .unwrap();
            match outcome {
                AllocationOutcome::Applied { slug } => slugs.push(slug),
                other => panic!("expected Applied, got {:?}", other),
            }
        }

        assert_eq!(
            slugs,
            vec!["launch-week", "launch-week-1", "launch-week-2", "launch-week-3"]
        );
    }

    #[tokio::test]
    async fn exhaustion_is_a_checked_path() {
        let store = InMemoryContentStore::new();
        let allocator = SlugAllocator::new(2);

        // Occupy both candidates the budget allows.
        for _ in 0..2 {
            let id = claimed_record(&store).await;
            allocator
                .allocate_and_complete(&store, id, &content("Tiny Budget"))
                .await
                .unwrap();
        }

        let id = claimed_record(&store).await;
        let err = allocator
            .allocate_and_complete(&store, id, &content("Tiny Budget"))
            .await
            .unwrap_err();
        assert!(matches!(err, SlugError::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn losing_the_claim_writes_nothing() {
        let store = InMemoryContentStore::new();
        let allocator = SlugAllocator::default();

        let id = claimed_record(&store).await;
        // Another actor finishes the record first.
        store.fail(id, "beaten to it").await.unwrap();

        let outcome = allocator
            .allocate_and_complete(&store, id, &content("Too Late"))
            .await
            .unwrap();
        assert!(matches!(outcome, AllocationOutcome::LostClaim));

        let record = store.get(id).await.unwrap().unwrap();
        assert!(record.slug.is_none());
        assert!(record.title.is_none());
    }
}
