use crate::DomainResult;
use crate::activities::ActivityCategory;
use crate::notifications::Notification;
use crate::ports::BoxFuture;

#[derive(Clone, Debug)]
pub struct NotificationListQuery {
    pub recipient_id: String,
    pub category: Option<ActivityCategory>,
    pub unread_only: bool,
    pub offset: usize,
    pub limit: usize,
}

#[allow(clippy::needless_pass_by_value)]
pub trait NotificationRepository: Send + Sync {
    /// Insert one notification. A row already present for the same
    /// `(recipient_id, dedupe_key)` pair must surface as
    /// `DomainError::Conflict`.
    fn create(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<Notification>>;

    fn get(&self, notification_id: &str) -> BoxFuture<'_, DomainResult<Option<Notification>>>;

    /// Recency-ordered page plus the total count of rows matching the query.
    fn list(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<(Vec<Notification>, usize)>>;

    fn list_queued_digest(&self) -> BoxFuture<'_, DomainResult<Vec<Notification>>>;

    fn mark_sent(&self, notification_id: &str) -> BoxFuture<'_, DomainResult<Notification>>;

    /// Transition a `queued_digest` row to `sent` and record the aggregate
    /// it was folded into, removing it from listings and unread totals.
    fn mark_folded(
        &self,
        notification_id: &str,
        aggregate_id: &str,
    ) -> BoxFuture<'_, DomainResult<Notification>>;

    /// Returns `NotFound` when the row does not exist or belongs to a
    /// different recipient. Marking an already-read row is a no-op.
    fn mark_read(
        &self,
        recipient_id: &str,
        notification_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Notification>>;

    fn mark_all_read(
        &self,
        recipient_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>>;

    fn unread_count(&self, recipient_id: &str) -> BoxFuture<'_, DomainResult<usize>>;
}
