use crate::DomainResult;
use crate::activities::{Activity, ActivityCategory};
use crate::ports::BoxFuture;

#[allow(clippy::needless_pass_by_value)]
pub trait ActivityRepository: Send + Sync {
    fn create(&self, activity: &Activity) -> BoxFuture<'_, DomainResult<Activity>>;

    fn get(&self, activity_id: &str) -> BoxFuture<'_, DomainResult<Option<Activity>>>;

    fn get_many(&self, activity_ids: &[String]) -> BoxFuture<'_, DomainResult<Vec<Activity>>>;

    /// Global recency-ordered listing restricted to the given categories,
    /// together with the total count of matching rows.
    fn list_public(
        &self,
        categories: &[ActivityCategory],
        offset: usize,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<(Vec<Activity>, usize)>>;
}
