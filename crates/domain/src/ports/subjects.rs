use crate::DomainResult;
use crate::ports::BoxFuture;

/// Resolves the entity an activity points at (interview, comment, user, ...)
/// into a display snapshot. `None` means the subject has been deleted since
/// the activity was recorded; feed entries tolerate that and render without
/// an enrichment rather than being dropped.
pub trait SubjectResolver: Send + Sync {
    fn resolve(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<serde_json::Value>>>;
}
