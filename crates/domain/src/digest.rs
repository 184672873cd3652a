use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::DomainResult;
use crate::activities::ActivityCategory;
use crate::notifications::{Channel, Notification, NotificationStatus};
use crate::ports::channels::ChannelSink;
use crate::ports::notifications::NotificationRepository;
use crate::preferences::PreferenceService;

const DIGEST_ACTOR: &str = "system";
const MAX_BODY_TITLES: usize = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DigestReport {
    pub buckets_seen: usize,
    pub digests_emitted: usize,
    pub notifications_folded: usize,
    pub failures: usize,
}

/// One pending batch: all `queued_digest` rows for a
/// `(recipient, category, channel)` triple. Derived from the rows on every
/// sweep, never persisted.
struct DigestBucket {
    recipient_id: String,
    category: ActivityCategory,
    channel: Channel,
    sources: Vec<Notification>,
}

/// Periodic driver that drains elapsed digest buckets into one aggregate
/// notification each. Safe to run redundantly: a bucket is only emitted
/// while its source rows are still queued, and sources are folded
/// immediately after the aggregate lands. Losing a race re-delivers
/// content rather than dropping it.
#[derive(Clone)]
pub struct DigestScheduler {
    notifications: Arc<dyn NotificationRepository>,
    preferences: PreferenceService,
    sink: Arc<dyn ChannelSink>,
}

impl DigestScheduler {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        preferences: PreferenceService,
        sink: Arc<dyn ChannelSink>,
    ) -> Self {
        Self {
            notifications,
            preferences,
            sink,
        }
    }

    pub async fn run_once(&self, now_ms: i64) -> DomainResult<DigestReport> {
        let queued = self.notifications.list_queued_digest().await?;
        let buckets = bucket_queued(queued);

        let mut report = DigestReport {
            buckets_seen: buckets.len(),
            ..DigestReport::default()
        };
        for bucket in buckets {
            // The cadence is re-read at sweep time; switching a category to
            // immediate flushes its queued rows on the next run.
            let preference = self
                .preferences
                .resolve(&bucket.recipient_id, bucket.category)
                .await?;
            let window_ms = preference.frequency.window_ms();
            let oldest_ms = bucket
                .sources
                .iter()
                .map(|source| source.created_at_ms)
                .min()
                .unwrap_or(now_ms);
            if now_ms - oldest_ms < window_ms {
                continue;
            }
            self.emit_bucket(bucket, now_ms, &mut report).await;
        }
        Ok(report)
    }

    async fn emit_bucket(&self, bucket: DigestBucket, now_ms: i64, report: &mut DigestReport) {
        let aggregate = render_aggregate(&bucket, now_ms);
        let aggregate = match self.notifications.create(&aggregate).await {
            Ok(aggregate) => aggregate,
            Err(err) => {
                // Sources stay queued; the next sweep retries the bucket.
                tracing::warn!(
                    recipient_id = bucket.recipient_id,
                    category = bucket.category.as_str(),
                    channel = bucket.channel.as_str(),
                    error = %err,
                    "digest aggregate insert failed"
                );
                report.failures += 1;
                return;
            }
        };
        report.digests_emitted += 1;

        if let Err(err) = self.sink.deliver(&aggregate).await {
            tracing::warn!(
                notification_id = aggregate.notification_id,
                channel = aggregate.channel.as_str(),
                error = %err,
                "digest channel submit failed"
            );
        }

        for source in &bucket.sources {
            match self
                .notifications
                .mark_folded(&source.notification_id, &aggregate.notification_id)
                .await
            {
                Ok(_) => report.notifications_folded += 1,
                Err(err) => {
                    // Left queued: it will be folded again next sweep, which
                    // may repeat its content in a second digest.
                    tracing::warn!(
                        notification_id = source.notification_id,
                        error = %err,
                        "failed to fold digest source"
                    );
                    report.failures += 1;
                }
            }
        }
    }
}

fn bucket_queued(queued: Vec<Notification>) -> Vec<DigestBucket> {
    let mut grouped: BTreeMap<(String, &'static str, &'static str), DigestBucket> =
        BTreeMap::new();
    for notification in queued {
        let key = (
            notification.recipient_id.clone(),
            notification.category.as_str(),
            notification.channel.as_str(),
        );
        grouped
            .entry(key)
            .or_insert_with(|| DigestBucket {
                recipient_id: notification.recipient_id.clone(),
                category: notification.category,
                channel: notification.channel,
                sources: Vec::new(),
            })
            .sources
            .push(notification);
    }
    grouped.into_values().collect()
}

fn render_aggregate(bucket: &DigestBucket, now_ms: i64) -> Notification {
    let count = bucket.sources.len();
    let mut titles: Vec<&str> = bucket
        .sources
        .iter()
        .take(MAX_BODY_TITLES)
        .map(|source| source.title.as_str())
        .collect();
    if count > MAX_BODY_TITLES {
        titles.push("...");
    }
    let source_ids: Vec<&str> = bucket
        .sources
        .iter()
        .map(|source| source.notification_id.as_str())
        .collect();

    let notification_id = crate::util::uuid_v7_without_dashes();
    Notification {
        dedupe_key: format!("digest:{notification_id}"),
        notification_id,
        recipient_id: bucket.recipient_id.clone(),
        actor_id: DIGEST_ACTOR.to_string(),
        actor_username: DIGEST_ACTOR.to_string(),
        category: bucket.category,
        channel: bucket.channel,
        title: digest_title(count, bucket.category),
        body: titles.join("; "),
        payload: Some(serde_json::json!({
            "digest": true,
            "source_ids": source_ids,
        })),
        status: NotificationStatus::Sent,
        folded_into: None,
        created_at_ms: now_ms,
        read_at_ms: None,
    }
}

fn digest_title(count: usize, category: ActivityCategory) -> String {
    let label = match category {
        ActivityCategory::InterviewPublished => "interview",
        ActivityCategory::CommentPosted => "comment",
        ActivityCategory::InterviewLiked => "like",
        ActivityCategory::UserFollowed => "follow",
        ActivityCategory::System => "system",
    };
    if count == 1 {
        format!("1 new {label} update")
    } else {
        format!("{count} new {label} updates")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(recipient: &str, category: ActivityCategory, channel: Channel, at: i64) -> Notification {
        Notification {
            notification_id: crate::util::uuid_v7_without_dashes(),
            recipient_id: recipient.to_string(),
            actor_id: "actor-1".into(),
            actor_username: "actor-1".into(),
            category,
            channel,
            title: format!("update at {at}"),
            body: "body".into(),
            payload: None,
            status: NotificationStatus::QueuedDigest,
            folded_into: None,
            created_at_ms: at,
            read_at_ms: None,
            dedupe_key: crate::util::uuid_v7_without_dashes(),
        }
    }

    #[test]
    fn buckets_group_by_recipient_category_channel() {
        let rows = vec![
            queued("user-42", ActivityCategory::InterviewPublished, Channel::Email, 10),
            queued("user-42", ActivityCategory::InterviewPublished, Channel::Email, 20),
            queued("user-42", ActivityCategory::CommentPosted, Channel::Email, 30),
            queued("user-9", ActivityCategory::InterviewPublished, Channel::Email, 40),
        ];
        let buckets = bucket_queued(rows);
        assert_eq!(buckets.len(), 3);
        let big = buckets
            .iter()
            .find(|bucket| {
                bucket.recipient_id == "user-42"
                    && bucket.category == ActivityCategory::InterviewPublished
            })
            .unwrap();
        assert_eq!(big.sources.len(), 2);
    }

    #[test]
    fn aggregate_counts_sources_and_keeps_channel() {
        let rows = vec![
            queued("user-42", ActivityCategory::InterviewPublished, Channel::Push, 10),
            queued("user-42", ActivityCategory::InterviewPublished, Channel::Push, 20),
            queued("user-42", ActivityCategory::InterviewPublished, Channel::Push, 30),
        ];
        let buckets = bucket_queued(rows);
        let aggregate = render_aggregate(&buckets[0], 1_000);
        assert_eq!(aggregate.channel, Channel::Push);
        assert_eq!(aggregate.status, NotificationStatus::Sent);
        assert_eq!(aggregate.title, "3 new interview updates");
        let payload = aggregate.payload.unwrap();
        assert_eq!(payload["source_ids"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn singular_digest_title() {
        assert_eq!(
            digest_title(1, ActivityCategory::CommentPosted),
            "1 new comment update"
        );
    }
}
