use std::sync::Arc;

use ripple_domain::activities::ActivityService;
use ripple_domain::feed::FeedService;
use ripple_domain::notifications::NotificationService;
use ripple_domain::ports::jobs::JobQueue;
use ripple_domain::preferences::PreferenceService;
use ripple_infra::config::AppConfig;
use ripple_infra::db::{RelationalStoreAdapter, StoreConfig};
use ripple_infra::jobs::RedisJobQueue;
use ripple_infra::repositories::{
    InMemoryActivityRepository, InMemoryFeedCacheRepository, InMemoryNotificationRepository,
    InMemoryPreferenceRepository, InMemorySubjectStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<RelationalStoreAdapter>,
    pub activities: ActivityService,
    pub feed: FeedService,
    pub notifications: NotificationService,
    pub preferences: PreferenceService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        if !config.data_backend.eq_ignore_ascii_case("memory") {
            anyhow::bail!("unsupported data_backend: {}", config.data_backend);
        }
        let jobs = RedisJobQueue::connect(&config.redis_url).await?;
        Ok(Self::with_job_queue(config, Arc::new(jobs)))
    }

    /// Wire the engine over the in-memory backend with the given queue.
    /// Tests inject a queue stub here; production uses Redis.
    pub fn with_job_queue(config: AppConfig, jobs: Arc<dyn JobQueue>) -> Self {
        let store = Arc::new(RelationalStoreAdapter::new(StoreConfig::from_app_config(
            &config,
        )));
        let activity_repo = Arc::new(InMemoryActivityRepository::new());
        let feed_cache = Arc::new(InMemoryFeedCacheRepository::new());
        let preference_repo = Arc::new(InMemoryPreferenceRepository::new());
        let notification_repo = Arc::new(InMemoryNotificationRepository::new());
        let subjects = Arc::new(InMemorySubjectStore::new());

        let preferences = PreferenceService::new(preference_repo);
        let activities = ActivityService::new(activity_repo.clone(), jobs);
        let feed = FeedService::new(
            activity_repo,
            feed_cache,
            preferences.clone(),
            subjects,
        );
        let notifications = NotificationService::new(notification_repo);

        Self {
            config,
            store,
            activities,
            feed,
            notifications,
            preferences,
        }
    }
}
