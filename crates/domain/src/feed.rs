use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::DomainResult;
use crate::activities::{Activity, ActivityCategory, PUBLIC_CATEGORIES};
use crate::error::DomainError;
use crate::fanout::FeedCacheEntry;
use crate::ports::activities::ActivityRepository;
use crate::ports::feed_cache::FeedCacheRepository;
use crate::ports::subjects::SubjectResolver;
use crate::preferences::PreferenceService;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 50;

#[derive(Clone, Debug, Serialize)]
pub struct FeedEntry {
    pub activity: Activity,
    /// Present on the personal feed only; the public feed is pure recency.
    pub relevance_score: Option<f64>,
    /// Snapshot of the referenced subject; `None` when it has been deleted
    /// since the activity was recorded.
    pub subject: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    pub total: usize,
}

#[derive(Clone)]
pub struct FeedService {
    activities: Arc<dyn ActivityRepository>,
    feed_cache: Arc<dyn FeedCacheRepository>,
    preferences: PreferenceService,
    subjects: Arc<dyn SubjectResolver>,
}

impl FeedService {
    pub fn new(
        activities: Arc<dyn ActivityRepository>,
        feed_cache: Arc<dyn FeedCacheRepository>,
        preferences: PreferenceService,
        subjects: Arc<dyn SubjectResolver>,
    ) -> Self {
        Self {
            activities,
            feed_cache,
            preferences,
            subjects,
        }
    }

    /// Own activities plus fan-out rows from followed actors, re-filtered
    /// against the recipient's *current* preferences: disabling a category
    /// hides rows that were already fanned out, without deleting them.
    pub async fn personal_feed(
        &self,
        user_id: &str,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> DomainResult<FeedPage> {
        if user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".into()));
        }
        let (offset, limit) = normalize_paging(page, page_size)?;

        let cached = self.feed_cache.list_for_recipient(user_id).await?;
        let activity_ids: Vec<String> = cached
            .iter()
            .map(|entry| entry.activity_id.clone())
            .collect();
        let activities = self.activities.get_many(&activity_ids).await?;
        let by_id: HashMap<&str, &Activity> = activities
            .iter()
            .map(|activity| (activity.activity_id.as_str(), activity))
            .collect();

        let mut visible_categories: HashMap<ActivityCategory, bool> = HashMap::new();
        let mut ranked: Vec<(FeedCacheEntry, Activity)> = Vec::with_capacity(cached.len());
        for entry in cached {
            // A cache row may outlive its activity under retention purges;
            // such rows are skipped, not treated as corruption.
            let Some(activity) = by_id.get(entry.activity_id.as_str()) else {
                tracing::debug!(
                    activity_id = entry.activity_id,
                    recipient_id = entry.recipient_id,
                    "feed cache row references a purged activity"
                );
                continue;
            };
            let visible = match visible_categories.get(&activity.category) {
                Some(visible) => *visible,
                None => {
                    let preference = self.preferences.resolve(user_id, activity.category).await?;
                    visible_categories.insert(activity.category, preference.enabled);
                    preference.enabled
                }
            };
            if visible {
                ranked.push((entry, (*activity).clone()));
            }
        }

        ranked.sort_by(|left, right| {
            right
                .0
                .relevance_score
                .total_cmp(&left.0.relevance_score)
                .then_with(|| right.1.created_at_ms.cmp(&left.1.created_at_ms))
                .then_with(|| right.1.activity_id.cmp(&left.1.activity_id))
        });

        let total = ranked.len();
        let mut entries = Vec::new();
        for (entry, activity) in ranked.into_iter().skip(offset).take(limit) {
            let subject = self.resolve_subject(&activity).await?;
            entries.push(FeedEntry {
                activity,
                relevance_score: Some(entry.relevance_score),
                subject,
            });
        }
        Ok(FeedPage { entries, total })
    }

    /// Global recency feed limited to the broadcastable category allow-list;
    /// no per-recipient filtering, safe for anonymous consumption.
    pub async fn public_feed(
        &self,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> DomainResult<FeedPage> {
        let (offset, limit) = normalize_paging(page, page_size)?;
        let (activities, total) = self
            .activities
            .list_public(PUBLIC_CATEGORIES, offset, limit)
            .await?;

        let mut entries = Vec::with_capacity(activities.len());
        for activity in activities {
            let subject = self.resolve_subject(&activity).await?;
            entries.push(FeedEntry {
                activity,
                relevance_score: None,
                subject,
            });
        }
        Ok(FeedPage { entries, total })
    }

    async fn resolve_subject(
        &self,
        activity: &Activity,
    ) -> DomainResult<Option<serde_json::Value>> {
        match self
            .subjects
            .resolve(&activity.subject_type, &activity.subject_id)
            .await
        {
            Ok(subject) => Ok(subject),
            Err(err) => {
                tracing::warn!(
                    subject_type = activity.subject_type,
                    subject_id = activity.subject_id,
                    error = %err,
                    "subject enrichment failed; returning entry without snapshot"
                );
                Ok(None)
            }
        }
    }
}

fn normalize_paging(
    page: Option<usize>,
    page_size: Option<usize>,
) -> DomainResult<(usize, usize)> {
    let page = page.unwrap_or(1);
    if page == 0 {
        return Err(DomainError::Validation("page must be >= 1".into()));
    }
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(DomainError::Validation(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(((page - 1) * page_size, page_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_to_first_page() {
        assert_eq!(normalize_paging(None, None).unwrap(), (0, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn paging_is_one_based() {
        assert_eq!(normalize_paging(Some(3), Some(10)).unwrap(), (20, 10));
        assert!(normalize_paging(Some(0), Some(10)).is_err());
    }

    #[test]
    fn paging_rejects_oversized_page() {
        assert!(normalize_paging(Some(1), Some(MAX_PAGE_SIZE + 1)).is_err());
        assert!(normalize_paging(Some(1), Some(0)).is_err());
    }
}
