use std::sync::Arc;
use std::time::Duration;

use ripple_domain::activities::{
    Activity, ActivityCategory, ActivityCreate, ActivityService, ActorIdentity, Visibility,
};
use ripple_domain::digest::DigestScheduler;
use ripple_domain::fanout::{FanoutEngine, SCORE_FOLLOWED, SCORE_SELF};
use ripple_domain::feed::FeedService;
use ripple_domain::jobs::{FanoutActivityPayload, RouteNotificationsPayload, now_ms};
use ripple_domain::notifications::{
    NotificationFilter, NotificationRouter, NotificationService, NotificationStatus,
};
use ripple_domain::ports::jobs::{JobQueue, JobType};
use ripple_domain::preferences::{
    CategoryPreference, DeliveryFrequency, PreferenceService, PreferenceUpdate,
};
use ripple_domain::util::uuid_v7_without_dashes;
use ripple_infra::repositories::{
    InMemoryActivityRepository, InMemoryFeedCacheRepository, InMemoryFollowGraph,
    InMemoryJobQueue, InMemoryNotificationRepository, InMemoryPreferenceRepository,
    InMemorySubjectStore, RecordingChannelSink,
};
use serde_json::json;

struct Harness {
    follows: Arc<InMemoryFollowGraph>,
    preference_repo: Arc<InMemoryPreferenceRepository>,
    feed_cache: Arc<InMemoryFeedCacheRepository>,
    activity_repo: Arc<InMemoryActivityRepository>,
    subjects: Arc<InMemorySubjectStore>,
    sink: Arc<RecordingChannelSink>,
    jobs: Arc<InMemoryJobQueue>,
    activities: ActivityService,
    preferences: PreferenceService,
    fanout: FanoutEngine,
    feed: FeedService,
    router: NotificationRouter,
    notifications: NotificationService,
    digest: DigestScheduler,
}

impl Harness {
    fn new() -> Self {
        let activity_repo = Arc::new(InMemoryActivityRepository::new());
        let follows = Arc::new(InMemoryFollowGraph::new());
        let preference_repo = Arc::new(InMemoryPreferenceRepository::new());
        let feed_cache = Arc::new(InMemoryFeedCacheRepository::new());
        let notification_repo = Arc::new(InMemoryNotificationRepository::new());
        let subjects = Arc::new(InMemorySubjectStore::new());
        let sink = Arc::new(RecordingChannelSink::new());
        let jobs = Arc::new(InMemoryJobQueue::new());

        let preferences = PreferenceService::new(preference_repo.clone());
        let activities = ActivityService::new(activity_repo.clone(), jobs.clone());
        let fanout = FanoutEngine::new(
            activity_repo.clone(),
            follows.clone(),
            preferences.clone(),
            feed_cache.clone(),
        )
        .with_limits(2, 4);
        let feed = FeedService::new(
            activity_repo.clone(),
            feed_cache.clone(),
            preferences.clone(),
            subjects.clone(),
        );
        let router = NotificationRouter::new(
            activity_repo.clone(),
            follows.clone(),
            preferences.clone(),
            notification_repo.clone(),
            sink.clone(),
        )
        .with_follower_page_size(2);
        let notifications = NotificationService::new(notification_repo.clone());
        let digest = DigestScheduler::new(
            notification_repo.clone(),
            preferences.clone(),
            sink.clone(),
        );

        Self {
            follows,
            preference_repo,
            feed_cache,
            activity_repo,
            subjects,
            sink,
            jobs,
            activities,
            preferences,
            fanout,
            feed,
            router,
            notifications,
            digest,
        }
    }

    async fn record_public(
        &self,
        actor: &str,
        category: &str,
        subject_type: &str,
        subject_id: &str,
    ) -> Activity {
        self.activities
            .record(
                ActorIdentity::with_user_id(actor),
                "corr-test".to_string(),
                ActivityCreate {
                    category: category.to_string(),
                    subject_type: subject_type.to_string(),
                    subject_id: subject_id.to_string(),
                    metadata: None,
                    visibility: Visibility::Public,
                },
            )
            .await
            .expect("record activity")
    }

    /// Insert an activity row directly, bypassing the writer, so tests can
    /// pin timestamps.
    async fn seed_activity(
        &self,
        actor: &str,
        category: ActivityCategory,
        created_at_ms: i64,
    ) -> Activity {
        use ripple_domain::ports::activities::ActivityRepository;
        let activity = Activity {
            activity_id: uuid_v7_without_dashes(),
            actor_id: actor.to_string(),
            actor_username: actor.to_string(),
            category,
            subject_type: "interview".to_string(),
            subject_id: format!("interview-{created_at_ms}"),
            metadata: None,
            visibility: Visibility::Public,
            created_at_ms,
        };
        self.activity_repo.create(&activity).await.expect("seed")
    }

    async fn set_preference(&self, preference: CategoryPreference) {
        use ripple_domain::ports::preferences::PreferenceRepository;
        self.preference_repo
            .upsert(&preference)
            .await
            .expect("preference upsert");
    }

    /// Plays the worker role: drains every queued job into the matching
    /// engine entry point.
    async fn drain_jobs(&self) {
        while let Some(job) = self
            .jobs
            .dequeue(Duration::from_secs(0))
            .await
            .expect("dequeue")
        {
            match job.job_type {
                JobType::FanoutActivity => {
                    let payload: FanoutActivityPayload =
                        serde_json::from_value(job.payload.clone()).expect("payload");
                    self.fanout
                        .fan_out(&payload.activity_id)
                        .await
                        .expect("fan-out");
                }
                JobType::RouteNotifications => {
                    let payload: RouteNotificationsPayload =
                        serde_json::from_value(job.payload.clone()).expect("payload");
                    self.router.route(&payload.activity_id).await.expect("route");
                }
                JobType::DigestSweep => {
                    self.digest.run_once(now_ms()).await.expect("digest sweep");
                }
            }
            self.jobs.ack(&job.job_id).await.expect("ack");
        }
    }
}

fn disabled_preference(user_id: &str, category: ActivityCategory) -> CategoryPreference {
    CategoryPreference {
        enabled: false,
        ..CategoryPreference::default_for(user_id, category)
    }
}

fn digest_preference(user_id: &str, category: ActivityCategory) -> CategoryPreference {
    CategoryPreference {
        frequency: DeliveryFrequency::Daily,
        ..CategoryPreference::default_for(user_id, category)
    }
}

#[tokio::test]
async fn fan_out_is_idempotent_across_retries() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-3".into(), "user-4".into(), "user-5".into()])
        .await;
    let activity = harness
        .seed_activity("user-7", ActivityCategory::InterviewPublished, 1_000)
        .await;

    let first = harness.fanout.fan_out(&activity.activity_id).await.unwrap();
    assert_eq!(first.entries_written, 4); // three followers plus self
    assert_eq!(first.duplicates, 0);
    assert!(!first.is_partial());

    let second = harness.fanout.fan_out(&activity.activity_id).await.unwrap();
    assert_eq!(second.entries_written, 0);
    assert_eq!(second.duplicates, 4);
    assert_eq!(harness.feed_cache.len().await, 4);
}

#[tokio::test]
async fn disabled_preference_blocks_fan_out_and_notifications() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-3".into(), "user-4".into()])
        .await;
    harness
        .set_preference(disabled_preference(
            "user-4",
            ActivityCategory::InterviewPublished,
        ))
        .await;
    let activity = harness
        .seed_activity("user-7", ActivityCategory::InterviewPublished, 1_000)
        .await;

    let report = harness.fanout.fan_out(&activity.activity_id).await.unwrap();
    assert_eq!(report.entries_written, 2); // self + user-3
    assert_eq!(report.skipped_disabled, 1);

    let routed = harness.router.route(&activity.activity_id).await.unwrap();
    assert_eq!(routed.skipped_disabled, 1);

    let feed = harness.feed.personal_feed("user-4", None, None).await.unwrap();
    assert_eq!(feed.total, 0);
    assert_eq!(
        harness
            .notifications
            .unread_count("user-4")
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn personal_feed_ranks_own_entries_above_followed() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-3".into()])
        .await;
    harness.follows.set_followers("user-3", vec![]).await;

    // Followed actor posts last; own posts are older but must rank first.
    let own_old = harness
        .seed_activity("user-3", ActivityCategory::CommentPosted, 1_000)
        .await;
    let own_newer = harness
        .seed_activity("user-3", ActivityCategory::CommentPosted, 2_000)
        .await;
    let followed_latest = harness
        .seed_activity("user-7", ActivityCategory::InterviewPublished, 3_000)
        .await;
    for activity in [&own_old, &own_newer, &followed_latest] {
        harness.fanout.fan_out(&activity.activity_id).await.unwrap();
    }

    let feed = harness.feed.personal_feed("user-3", None, None).await.unwrap();
    assert_eq!(feed.total, 3);
    let ids: Vec<&str> = feed
        .entries
        .iter()
        .map(|entry| entry.activity.activity_id.as_str())
        .collect();
    assert_eq!(
        ids,
        vec![
            own_newer.activity_id.as_str(),
            own_old.activity_id.as_str(),
            followed_latest.activity_id.as_str(),
        ]
    );
    assert_eq!(feed.entries[0].relevance_score, Some(SCORE_SELF));
    assert_eq!(feed.entries[2].relevance_score, Some(SCORE_FOLLOWED));
}

#[tokio::test]
async fn preference_change_hides_rows_without_deleting_them() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-3".into()])
        .await;
    let activity = harness
        .seed_activity("user-7", ActivityCategory::InterviewLiked, 1_000)
        .await;
    harness.fanout.fan_out(&activity.activity_id).await.unwrap();

    let before = harness.feed.personal_feed("user-3", None, None).await.unwrap();
    assert_eq!(before.total, 1);

    harness
        .preferences
        .update(
            "user-3",
            vec![PreferenceUpdate {
                category: "interview_liked".to_string(),
                enabled: false,
                in_app_enabled: false,
                email_enabled: false,
                push_enabled: false,
                frequency: "immediate".to_string(),
            }],
        )
        .await
        .unwrap();

    let after = harness.feed.personal_feed("user-3", None, None).await.unwrap();
    assert_eq!(after.total, 0);
    // The cache row survives; only the read path filters it.
    assert_eq!(harness.feed_cache.len().await, 2);
}

#[tokio::test]
async fn mark_all_read_is_idempotent_and_counter_recovers() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-3".into()])
        .await;
    let first = harness
        .seed_activity("user-7", ActivityCategory::InterviewPublished, 1_000)
        .await;
    harness.router.route(&first.activity_id).await.unwrap();
    assert_eq!(harness.notifications.unread_count("user-3").await.unwrap(), 1);

    assert_eq!(harness.notifications.mark_all_read("user-3").await.unwrap(), 0);
    assert_eq!(harness.notifications.mark_all_read("user-3").await.unwrap(), 0);

    let second = harness
        .seed_activity("user-7", ActivityCategory::InterviewPublished, 2_000)
        .await;
    harness.router.route(&second.activity_id).await.unwrap();
    assert_eq!(harness.notifications.unread_count("user-3").await.unwrap(), 1);
}

#[tokio::test]
async fn single_mark_read_is_idempotent() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-3".into()])
        .await;
    let activity = harness
        .seed_activity("user-7", ActivityCategory::InterviewPublished, 1_000)
        .await;
    harness.router.route(&activity.activity_id).await.unwrap();

    let page = harness
        .notifications
        .list("user-3", NotificationFilter::default(), None, None)
        .await
        .unwrap();
    assert_eq!(page.unread_count, 1);
    let notification_id = page.items[0].notification_id.clone();

    let count = harness
        .notifications
        .mark_read("user-3", &notification_id)
        .await
        .unwrap();
    assert_eq!(count, 0);
    let count = harness
        .notifications
        .mark_read("user-3", &notification_id)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn digest_folds_queued_rows_into_one_aggregate() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-42".into()])
        .await;
    harness
        .set_preference(digest_preference(
            "user-42",
            ActivityCategory::InterviewPublished,
        ))
        .await;

    let base_ms = now_ms();
    for offset in 0..3 {
        let activity = harness
            .seed_activity(
                "user-7",
                ActivityCategory::InterviewPublished,
                base_ms + offset,
            )
            .await;
        let report = harness.router.route(&activity.activity_id).await.unwrap();
        assert_eq!(report.queued_digest, 1);
    }
    // Queued rows are invisible until the digest lands.
    assert_eq!(harness.notifications.unread_count("user-42").await.unwrap(), 0);

    // Window not yet elapsed: nothing to emit.
    let early = harness.digest.run_once(base_ms).await.unwrap();
    assert_eq!(early.digests_emitted, 0);

    let window = DeliveryFrequency::Daily.window_ms();
    let report = harness.digest.run_once(base_ms + window + 1_000).await.unwrap();
    assert_eq!(report.digests_emitted, 1);
    assert_eq!(report.notifications_folded, 3);
    assert_eq!(report.failures, 0);

    // Only the aggregate is visible and unread.
    let page = harness
        .notifications
        .list("user-42", NotificationFilter::default(), None, None)
        .await
        .unwrap();
    assert_eq!(page.unread_count, 1);
    assert_eq!(page.total, 1);
    let aggregate = &page.items[0];
    assert_eq!(aggregate.status, NotificationStatus::Sent);
    assert_eq!(aggregate.title, "3 new interview updates");

    // A second sweep finds an empty bucket and emits nothing.
    let again = harness
        .digest
        .run_once(base_ms + 2 * window)
        .await
        .unwrap();
    assert_eq!(again.digests_emitted, 0);
    assert_eq!(harness.notifications.unread_count("user-42").await.unwrap(), 1);
}

#[tokio::test]
async fn record_activity_fans_out_end_to_end() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers(
            "user-7",
            vec!["user-3".into(), "user-4".into(), "user-5".into()],
        )
        .await;
    harness
        .set_preference(disabled_preference(
            "user-4",
            ActivityCategory::InterviewPublished,
        ))
        .await;
    harness
        .subjects
        .put(
            "interview",
            "interview-99",
            json!({"interview_id": "interview-99", "headline": "On fan-out"}),
        )
        .await;

    let activity = harness
        .record_public("user-7", "interview_published", "interview", "interview-99")
        .await;
    // The write returns before delivery: nothing is visible yet.
    assert_eq!(harness.feed_cache.len().await, 0);

    harness.drain_jobs().await;

    for user in ["user-3", "user-5"] {
        let feed = harness.feed.personal_feed(user, None, None).await.unwrap();
        assert_eq!(feed.total, 1, "feed of {user}");
        let entry = &feed.entries[0];
        assert_eq!(entry.activity.activity_id, activity.activity_id);
        assert_eq!(entry.activity.subject_id, "interview-99");
        assert_eq!(
            entry.subject.as_ref().unwrap()["headline"],
            json!("On fan-out")
        );
    }
    let hidden = harness.feed.personal_feed("user-4", None, None).await.unwrap();
    assert_eq!(hidden.total, 0);

    // Immediate in-app notifications went through the sink and are unread.
    assert_eq!(harness.notifications.unread_count("user-3").await.unwrap(), 1);
    assert_eq!(harness.notifications.unread_count("user-4").await.unwrap(), 0);
    assert_eq!(harness.sink.delivered().await.len(), 2);
}

#[tokio::test]
async fn public_feed_is_recency_ordered_and_allow_listed() {
    let harness = Harness::new();
    harness
        .seed_activity("user-1", ActivityCategory::InterviewPublished, 1_000)
        .await;
    harness
        .seed_activity("user-2", ActivityCategory::InterviewLiked, 2_000)
        .await;
    let newest = harness
        .seed_activity("user-3", ActivityCategory::InterviewPublished, 3_000)
        .await;

    let feed = harness.feed.public_feed(None, None).await.unwrap();
    assert_eq!(feed.total, 2);
    assert_eq!(feed.entries[0].activity.activity_id, newest.activity_id);
    assert!(feed.entries.iter().all(|entry| entry.relevance_score.is_none()));
    assert!(
        feed.entries
            .iter()
            .all(|entry| entry.activity.category == ActivityCategory::InterviewPublished)
    );
}

#[tokio::test]
async fn deleted_subject_keeps_feed_entry_with_null_enrichment() {
    let harness = Harness::new();
    harness.follows.set_followers("user-7", vec![]).await;
    harness
        .subjects
        .put("interview", "interview-1", json!({"headline": "soon gone"}))
        .await;
    let activity = harness
        .record_public("user-7", "interview_published", "interview", "interview-1")
        .await;
    harness.drain_jobs().await;
    harness.subjects.remove("interview", "interview-1").await;

    let feed = harness.feed.personal_feed("user-7", None, None).await.unwrap();
    assert_eq!(feed.total, 1);
    assert_eq!(feed.entries[0].activity.activity_id, activity.activity_id);
    assert!(feed.entries[0].subject.is_none());
}

#[tokio::test]
async fn private_activity_stays_on_own_feed_only() {
    let harness = Harness::new();
    harness
        .follows
        .set_followers("user-7", vec!["user-3".into()])
        .await;
    let activity = harness
        .activities
        .record(
            ActorIdentity::with_user_id("user-7"),
            "corr-test".to_string(),
            ActivityCreate {
                category: "comment_posted".to_string(),
                subject_type: "comment".to_string(),
                subject_id: "comment-1".to_string(),
                metadata: None,
                visibility: Visibility::Private,
            },
        )
        .await
        .unwrap();
    harness.drain_jobs().await;

    let own = harness.feed.personal_feed("user-7", None, None).await.unwrap();
    assert_eq!(own.total, 1);
    assert_eq!(own.entries[0].activity.activity_id, activity.activity_id);
    let follower = harness.feed.personal_feed("user-3", None, None).await.unwrap();
    assert_eq!(follower.total, 0);
    assert_eq!(harness.notifications.unread_count("user-3").await.unwrap(), 0);
}
