use crate::DomainResult;
use crate::fanout::FeedCacheEntry;
use crate::ports::BoxFuture;

#[allow(clippy::needless_pass_by_value)]
pub trait FeedCacheRepository: Send + Sync {
    /// Insert one fan-out row. A row already present for the same
    /// `(recipient_id, activity_id)` pair must surface as
    /// `DomainError::Conflict`; callers treat that as a no-op.
    fn insert(&self, entry: &FeedCacheEntry) -> BoxFuture<'_, DomainResult<FeedCacheEntry>>;

    fn list_for_recipient(
        &self,
        recipient_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<FeedCacheEntry>>>;
}
