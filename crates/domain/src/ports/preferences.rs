use crate::DomainResult;
use crate::activities::ActivityCategory;
use crate::ports::BoxFuture;
use crate::preferences::CategoryPreference;

#[allow(clippy::needless_pass_by_value)]
pub trait PreferenceRepository: Send + Sync {
    fn get(
        &self,
        user_id: &str,
        category: &ActivityCategory,
    ) -> BoxFuture<'_, DomainResult<Option<CategoryPreference>>>;

    fn list_for_user(&self, user_id: &str)
    -> BoxFuture<'_, DomainResult<Vec<CategoryPreference>>>;

    fn upsert(
        &self,
        preference: &CategoryPreference,
    ) -> BoxFuture<'_, DomainResult<CategoryPreference>>;
}
