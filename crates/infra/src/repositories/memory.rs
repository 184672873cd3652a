use std::collections::HashMap;
use std::sync::Arc;

use ripple_domain::DomainResult;
use ripple_domain::activities::{Activity, ActivityCategory, Visibility};
use ripple_domain::error::DomainError;
use ripple_domain::fanout::FeedCacheEntry;
use ripple_domain::notifications::{Notification, NotificationStatus};
use ripple_domain::ports::BoxFuture;
use ripple_domain::ports::activities::ActivityRepository;
use ripple_domain::ports::channels::ChannelSink;
use ripple_domain::ports::feed_cache::FeedCacheRepository;
use ripple_domain::ports::follows::{FollowGraph, FollowerPage};
use ripple_domain::ports::jobs::{JobEnvelope, JobQueue, JobQueueError};
use ripple_domain::ports::notifications::{NotificationListQuery, NotificationRepository};
use ripple_domain::ports::preferences::PreferenceRepository;
use ripple_domain::ports::subjects::SubjectResolver;
use ripple_domain::preferences::CategoryPreference;
use tokio::sync::{Mutex, RwLock};

/// In-memory backends for every engine port. They are the `memory` data
/// backend in development and the substrate for the test suites; the
/// uniqueness contracts match what the relational schema enforces.

#[derive(Default)]
pub struct InMemoryActivityRepository {
    store: Arc<RwLock<HashMap<String, Activity>>>,
}

impl InMemoryActivityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityRepository for InMemoryActivityRepository {
    fn create(&self, activity: &Activity) -> BoxFuture<'_, DomainResult<Activity>> {
        let activity = activity.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            if store.contains_key(&activity.activity_id) {
                return Err(DomainError::Conflict);
            }
            store.insert(activity.activity_id.clone(), activity.clone());
            Ok(activity)
        })
    }

    fn get(&self, activity_id: &str) -> BoxFuture<'_, DomainResult<Option<Activity>>> {
        let activity_id = activity_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&activity_id).cloned()) })
    }

    fn get_many(&self, activity_ids: &[String]) -> BoxFuture<'_, DomainResult<Vec<Activity>>> {
        let activity_ids = activity_ids.to_vec();
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.read().await;
            Ok(activity_ids
                .iter()
                .filter_map(|activity_id| store.get(activity_id).cloned())
                .collect())
        })
    }

    fn list_public(
        &self,
        categories: &[ActivityCategory],
        offset: usize,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<(Vec<Activity>, usize)>> {
        let categories = categories.to_vec();
        let store = self.store.clone();
        Box::pin(async move {
            let mut rows: Vec<Activity> = store
                .read()
                .await
                .values()
                .filter(|activity| {
                    activity.visibility == Visibility::Public
                        && categories.contains(&activity.category)
                })
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                right
                    .created_at_ms
                    .cmp(&left.created_at_ms)
                    .then_with(|| right.activity_id.cmp(&left.activity_id))
            });
            let total = rows.len();
            let page = rows.into_iter().skip(offset).take(limit).collect();
            Ok((page, total))
        })
    }
}

#[derive(Default)]
pub struct InMemoryFeedCacheRepository {
    store: Arc<RwLock<HashMap<(String, String), FeedCacheEntry>>>,
}

impl InMemoryFeedCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently cached, across all recipients.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }
}

impl FeedCacheRepository for InMemoryFeedCacheRepository {
    fn insert(&self, entry: &FeedCacheEntry) -> BoxFuture<'_, DomainResult<FeedCacheEntry>> {
        let entry = entry.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let key = (entry.recipient_id.clone(), entry.activity_id.clone());
            let mut store = store.write().await;
            if store.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            store.insert(key, entry.clone());
            Ok(entry)
        })
    }

    fn list_for_recipient(
        &self,
        recipient_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<FeedCacheEntry>>> {
        let recipient_id = recipient_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|entry| entry.recipient_id == recipient_id)
                .cloned()
                .collect())
        })
    }
}

#[derive(Default)]
pub struct InMemoryFollowGraph {
    followers: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl InMemoryFollowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_followers(&self, followed_id: &str, follower_ids: Vec<String>) {
        self.followers
            .write()
            .await
            .insert(followed_id.to_string(), follower_ids);
    }
}

impl FollowGraph for InMemoryFollowGraph {
    fn followers_page(
        &self,
        followed_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<FollowerPage>> {
        let followed_id = followed_id.to_string();
        let cursor = cursor.map(str::to_string);
        let followers = self.followers.clone();
        Box::pin(async move {
            let offset: usize = match cursor.as_deref() {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| DomainError::Validation("invalid follower cursor".into()))?,
                None => 0,
            };
            let followers = followers.read().await;
            let all = followers
                .get(&followed_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let page: Vec<String> = all.iter().skip(offset).take(limit).cloned().collect();
            let next_offset = offset + page.len();
            let next_cursor = (next_offset < all.len()).then(|| next_offset.to_string());
            Ok(FollowerPage {
                follower_ids: page,
                next_cursor,
            })
        })
    }
}

#[derive(Default)]
pub struct InMemoryPreferenceRepository {
    store: Arc<RwLock<HashMap<(String, ActivityCategory), CategoryPreference>>>,
}

impl InMemoryPreferenceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceRepository for InMemoryPreferenceRepository {
    fn get(
        &self,
        user_id: &str,
        category: &ActivityCategory,
    ) -> BoxFuture<'_, DomainResult<Option<CategoryPreference>>> {
        let key = (user_id.to_string(), *category);
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&key).cloned()) })
    }

    fn list_for_user(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<CategoryPreference>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|preference| preference.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn upsert(
        &self,
        preference: &CategoryPreference,
    ) -> BoxFuture<'_, DomainResult<CategoryPreference>> {
        let preference = preference.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let key = (preference.user_id.clone(), preference.category);
            store.write().await.insert(key, preference.clone());
            Ok(preference)
        })
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    store: Arc<RwLock<HashMap<String, Notification>>>,
    by_dedupe: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationRepository for InMemoryNotificationRepository {
    fn create(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification = notification.clone();
        let store = self.store.clone();
        let by_dedupe = self.by_dedupe.clone();
        Box::pin(async move {
            let dedupe = (
                notification.recipient_id.clone(),
                notification.dedupe_key.clone(),
            );
            let mut by_dedupe = by_dedupe.write().await;
            if by_dedupe.contains_key(&dedupe) {
                return Err(DomainError::Conflict);
            }
            let mut store = store.write().await;
            if store.contains_key(&notification.notification_id) {
                return Err(DomainError::Conflict);
            }
            by_dedupe.insert(dedupe, notification.notification_id.clone());
            store.insert(notification.notification_id.clone(), notification.clone());
            Ok(notification)
        })
    }

    fn get(&self, notification_id: &str) -> BoxFuture<'_, DomainResult<Option<Notification>>> {
        let notification_id = notification_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&notification_id).cloned()) })
    }

    fn list(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<(Vec<Notification>, usize)>> {
        let query = query.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut rows: Vec<Notification> = store
                .read()
                .await
                .values()
                .filter(|notification| notification.recipient_id == query.recipient_id)
                .filter(|notification| notification.folded_into.is_none())
                .filter(|notification| {
                    query
                        .category
                        .map_or(true, |category| notification.category == category)
                })
                .filter(|notification| !query.unread_only || notification.is_unread())
                .cloned()
                .collect();
            rows.sort_by(|left, right| {
                right
                    .created_at_ms
                    .cmp(&left.created_at_ms)
                    .then_with(|| right.notification_id.cmp(&left.notification_id))
            });
            let total = rows.len();
            let page = rows
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .collect();
            Ok((page, total))
        })
    }

    fn list_queued_digest(&self) -> BoxFuture<'_, DomainResult<Vec<Notification>>> {
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|notification| notification.status == NotificationStatus::QueuedDigest)
                .cloned()
                .collect())
        })
    }

    fn mark_sent(&self, notification_id: &str) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification_id = notification_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let notification = store
                .get_mut(&notification_id)
                .ok_or(DomainError::NotFound)?;
            if notification.status != NotificationStatus::Read {
                notification.status = NotificationStatus::Sent;
            }
            Ok(notification.clone())
        })
    }

    fn mark_folded(
        &self,
        notification_id: &str,
        aggregate_id: &str,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification_id = notification_id.to_string();
        let aggregate_id = aggregate_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let notification = store
                .get_mut(&notification_id)
                .ok_or(DomainError::NotFound)?;
            notification.status = NotificationStatus::Sent;
            notification.folded_into = Some(aggregate_id);
            Ok(notification.clone())
        })
    }

    fn mark_read(
        &self,
        recipient_id: &str,
        notification_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let recipient_id = recipient_id.to_string();
        let notification_id = notification_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let notification = store
                .get_mut(&notification_id)
                .ok_or(DomainError::NotFound)?;
            // Another user's row is reported as absent, not as forbidden.
            if notification.recipient_id != recipient_id {
                return Err(DomainError::NotFound);
            }
            if notification.status != NotificationStatus::Read {
                notification.status = NotificationStatus::Read;
                notification.read_at_ms = Some(read_at_ms);
            }
            Ok(notification.clone())
        })
    }

    fn mark_all_read(
        &self,
        recipient_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<usize>> {
        let recipient_id = recipient_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let mut marked = 0usize;
            for notification in store.values_mut() {
                if notification.recipient_id == recipient_id && notification.is_unread() {
                    notification.status = NotificationStatus::Read;
                    notification.read_at_ms = Some(read_at_ms);
                    marked += 1;
                }
            }
            Ok(marked)
        })
    }

    fn unread_count(&self, recipient_id: &str) -> BoxFuture<'_, DomainResult<usize>> {
        let recipient_id = recipient_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|notification| {
                    notification.recipient_id == recipient_id && notification.is_unread()
                })
                .count())
        })
    }
}

#[derive(Default)]
pub struct InMemorySubjectStore {
    subjects: Arc<RwLock<HashMap<(String, String), serde_json::Value>>>,
}

impl InMemorySubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, subject_type: &str, subject_id: &str, snapshot: serde_json::Value) {
        self.subjects
            .write()
            .await
            .insert((subject_type.to_string(), subject_id.to_string()), snapshot);
    }

    /// Simulates subject deletion; feed entries referencing it keep
    /// rendering with a null enrichment.
    pub async fn remove(&self, subject_type: &str, subject_id: &str) {
        self.subjects
            .write()
            .await
            .remove(&(subject_type.to_string(), subject_id.to_string()));
    }
}

impl SubjectResolver for InMemorySubjectStore {
    fn resolve(
        &self,
        subject_type: &str,
        subject_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<serde_json::Value>>> {
        let key = (subject_type.to_string(), subject_id.to_string());
        let subjects = self.subjects.clone();
        Box::pin(async move { Ok(subjects.read().await.get(&key).cloned()) })
    }
}

/// Logs deliveries instead of talking to a real transport. The production
/// deployment swaps in per-channel senders behind the same port.
#[derive(Default, Clone)]
pub struct TracingChannelSink;

impl ChannelSink for TracingChannelSink {
    fn deliver(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<()>> {
        let notification_id = notification.notification_id.clone();
        let recipient_id = notification.recipient_id.clone();
        let channel = notification.channel.as_str();
        Box::pin(async move {
            tracing::info!(notification_id, recipient_id, channel, "notification submitted");
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingChannelSink {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }
}

impl ChannelSink for RecordingChannelSink {
    fn deliver(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<()>> {
        let notification = notification.clone();
        let delivered = self.delivered.clone();
        Box::pin(async move {
            delivered.lock().await.push(notification);
            Ok(())
        })
    }
}

/// Test and development stand-in for the Redis queue; same ready/delayed/
/// processing shape, no broker.
#[derive(Default)]
pub struct InMemoryJobQueue {
    inner: Arc<Mutex<JobQueueState>>,
}

#[derive(Default)]
struct JobQueueState {
    ready: Vec<JobEnvelope>,
    delayed: Vec<JobEnvelope>,
    processing: HashMap<String, JobEnvelope>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ready_len(&self) -> usize {
        self.inner.lock().await.ready.len()
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job = job.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            if job.run_at_ms <= ripple_domain::jobs::now_ms() {
                state.ready.push(job);
            } else {
                state.delayed.push(job);
            }
            Ok(())
        })
    }

    fn dequeue(
        &self,
        _timeout: std::time::Duration,
    ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            if state.ready.is_empty() {
                return Ok(None);
            }
            let job = state.ready.remove(0);
            state.processing.insert(job.job_id.clone(), job.clone());
            Ok(Some(job))
        })
    }

    fn ack(&self, job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job_id = job_id.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.lock().await.processing.remove(&job_id);
            Ok(())
        })
    }

    fn promote_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let mut moved = 0usize;
            let mut index = 0;
            while index < state.delayed.len() && moved < limit {
                if state.delayed[index].run_at_ms <= now_ms {
                    let job = state.delayed.remove(index);
                    state.ready.push(job);
                    moved += 1;
                } else {
                    index += 1;
                }
            }
            Ok(moved)
        })
    }

    fn requeue_processing(&self, limit: usize) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let job_ids: Vec<String> = state.processing.keys().take(limit).cloned().collect();
            for job_id in &job_ids {
                if let Some(job) = state.processing.remove(job_id) {
                    state.ready.push(job);
                }
            }
            Ok(job_ids.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_domain::notifications::Channel;

    fn entry(recipient: &str, activity: &str) -> FeedCacheEntry {
        FeedCacheEntry {
            recipient_id: recipient.to_string(),
            activity_id: activity.to_string(),
            relevance_score: 1.0,
            inserted_at_ms: 0,
        }
    }

    fn notification(recipient: &str, dedupe: &str) -> Notification {
        Notification {
            notification_id: ripple_domain::util::uuid_v7_without_dashes(),
            recipient_id: recipient.to_string(),
            actor_id: "actor-1".into(),
            actor_username: "actor-1".into(),
            category: ActivityCategory::InterviewPublished,
            channel: Channel::InApp,
            title: "title".into(),
            body: "body".into(),
            payload: None,
            status: NotificationStatus::Sent,
            folded_into: None,
            created_at_ms: 0,
            read_at_ms: None,
            dedupe_key: dedupe.to_string(),
        }
    }

    #[tokio::test]
    async fn feed_cache_rejects_duplicate_pair() {
        let repo = InMemoryFeedCacheRepository::new();
        repo.insert(&entry("user-3", "act-1")).await.unwrap();
        let err = repo.insert(&entry("user-3", "act-1")).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict));
        // Same activity for another recipient is a distinct row.
        repo.insert(&entry("user-4", "act-1")).await.unwrap();
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn notification_dedupe_is_scoped_per_recipient() {
        let repo = InMemoryNotificationRepository::new();
        repo.create(&notification("user-3", "k1")).await.unwrap();
        let err = repo.create(&notification("user-3", "k1")).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict));
        repo.create(&notification("user-4", "k1")).await.unwrap();
    }

    #[tokio::test]
    async fn mark_read_rejects_foreign_rows() {
        let repo = InMemoryNotificationRepository::new();
        let created = repo.create(&notification("user-3", "k1")).await.unwrap();
        let err = repo
            .mark_read("user-4", &created.notification_id, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[tokio::test]
    async fn follower_pages_walk_the_whole_set() {
        let graph = InMemoryFollowGraph::new();
        graph
            .set_followers(
                "user-7",
                (0..5).map(|index| format!("f{index}")).collect(),
            )
            .await;
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = graph
                .followers_page("user-7", cursor.as_deref(), 2)
                .await
                .unwrap();
            seen.extend(page.follower_ids);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["f0", "f1", "f2", "f3", "f4"]);
    }
}
