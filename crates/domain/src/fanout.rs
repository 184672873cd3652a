use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::activities::{Activity, Visibility};
use crate::error::DomainError;
use crate::jobs::now_ms;
use crate::ports::activities::ActivityRepository;
use crate::ports::feed_cache::FeedCacheRepository;
use crate::ports::follows::FollowGraph;
use crate::preferences::PreferenceService;

/// A user's own activity always outranks a followed actor's at equal
/// recency.
pub const SCORE_SELF: f64 = 2.0;
pub const SCORE_FOLLOWED: f64 = 1.0;

const DEFAULT_FOLLOWER_PAGE_SIZE: usize = 200;
const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeedCacheEntry {
    pub recipient_id: String,
    pub activity_id: String,
    pub relevance_score: f64,
    pub inserted_at_ms: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub recipients_seen: usize,
    pub entries_written: usize,
    pub duplicates: usize,
    pub skipped_disabled: usize,
    pub failed: usize,
}

impl FanoutReport {
    /// Some recipients' rows could not be written; the attempt should be
    /// retried at the job level. Already-written rows are absorbed as
    /// duplicates on replay.
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

enum DeliveryOutcome {
    Written,
    Duplicate,
    SkippedDisabled,
    Failed,
}

#[derive(Clone)]
pub struct FanoutEngine {
    activities: Arc<dyn ActivityRepository>,
    follows: Arc<dyn FollowGraph>,
    preferences: PreferenceService,
    feed_cache: Arc<dyn FeedCacheRepository>,
    page_size: usize,
    concurrency: usize,
}

impl FanoutEngine {
    pub fn new(
        activities: Arc<dyn ActivityRepository>,
        follows: Arc<dyn FollowGraph>,
        preferences: PreferenceService,
        feed_cache: Arc<dyn FeedCacheRepository>,
    ) -> Self {
        Self {
            activities,
            follows,
            preferences,
            feed_cache,
            page_size: DEFAULT_FOLLOWER_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_limits(mut self, page_size: usize, concurrency: usize) -> Self {
        self.page_size = page_size.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    /// Distribute one activity into per-recipient feed cache rows. The
    /// follower set is walked one bounded page at a time; per-recipient
    /// inserts within a page run concurrently. A failure on one recipient
    /// never aborts the rest; a missing activity fails the whole attempt.
    pub async fn fan_out(&self, activity_id: &str) -> DomainResult<FanoutReport> {
        let activity = self
            .activities
            .get(activity_id)
            .await?
            .ok_or(DomainError::NotFound)?;

        let mut report = FanoutReport::default();
        self.deliver_page(
            &activity,
            vec![activity.actor_id.clone()],
            &mut report,
        )
        .await;

        // Private activities stay on the author's own feed.
        if activity.visibility == Visibility::Private {
            return Ok(report);
        }

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .follows
                .followers_page(&activity.actor_id, cursor.as_deref(), self.page_size)
                .await?;
            let recipients: Vec<String> = page
                .follower_ids
                .into_iter()
                .filter(|follower_id| follower_id != &activity.actor_id)
                .collect();
            self.deliver_page(&activity, recipients, &mut report).await;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if report.is_partial() {
            tracing::warn!(
                activity_id = activity.activity_id,
                failed = report.failed,
                written = report.entries_written,
                "fan-out completed with per-recipient failures"
            );
        }
        Ok(report)
    }

    async fn deliver_page(
        &self,
        activity: &Activity,
        recipients: Vec<String>,
        report: &mut FanoutReport,
    ) {
        report.recipients_seen += recipients.len();
        let outcomes: Vec<DeliveryOutcome> = stream::iter(
            recipients
                .into_iter()
                .map(|recipient_id| self.deliver_one(activity, recipient_id)),
        )
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        for outcome in outcomes {
            match outcome {
                DeliveryOutcome::Written => report.entries_written += 1,
                DeliveryOutcome::Duplicate => report.duplicates += 1,
                DeliveryOutcome::SkippedDisabled => report.skipped_disabled += 1,
                DeliveryOutcome::Failed => report.failed += 1,
            }
        }
    }

    async fn deliver_one(&self, activity: &Activity, recipient_id: String) -> DeliveryOutcome {
        let preference = match self
            .preferences
            .resolve(&recipient_id, activity.category)
            .await
        {
            Ok(preference) => preference,
            Err(err) => {
                tracing::warn!(
                    activity_id = activity.activity_id,
                    recipient_id,
                    error = %err,
                    "preference lookup failed during fan-out"
                );
                return DeliveryOutcome::Failed;
            }
        };
        if !preference.enabled {
            return DeliveryOutcome::SkippedDisabled;
        }

        let entry = FeedCacheEntry {
            relevance_score: relevance_score(&activity.actor_id, &recipient_id),
            recipient_id,
            activity_id: activity.activity_id.clone(),
            inserted_at_ms: now_ms(),
        };
        match self.feed_cache.insert(&entry).await {
            Ok(_) => DeliveryOutcome::Written,
            Err(DomainError::Conflict) => DeliveryOutcome::Duplicate,
            Err(err) => {
                tracing::warn!(
                    activity_id = activity.activity_id,
                    recipient_id = entry.recipient_id,
                    error = %err,
                    "feed cache insert failed"
                );
                DeliveryOutcome::Failed
            }
        }
    }
}

pub fn relevance_score(actor_id: &str, recipient_id: &str) -> f64 {
    if actor_id == recipient_id {
        SCORE_SELF
    } else {
        SCORE_FOLLOWED
    }
}
