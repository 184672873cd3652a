use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::activities::{Activity, ActivityCategory, Visibility};
use crate::error::DomainError;
use crate::jobs::now_ms;
use crate::ports::activities::ActivityRepository;
use crate::ports::channels::ChannelSink;
use crate::ports::follows::FollowGraph;
use crate::ports::notifications::{NotificationListQuery, NotificationRepository};
use crate::preferences::{CategoryPreference, DeliveryFrequency, PreferenceService};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 50;
const DEFAULT_FOLLOWER_PAGE_SIZE: usize = 200;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "in_app",
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    QueuedDigest,
    Sent,
    Read,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub recipient_id: String,
    pub actor_id: String,
    pub actor_username: String,
    pub category: ActivityCategory,
    pub channel: Channel,
    pub title: String,
    pub body: String,
    pub payload: Option<serde_json::Value>,
    pub status: NotificationStatus,
    /// Set when this row was folded into a digest aggregate; folded rows
    /// are invisible to listings and unread totals — only the aggregate is.
    pub folded_into: Option<String>,
    pub created_at_ms: i64,
    pub read_at_ms: Option<i64>,
    pub dedupe_key: String,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        matches!(
            self.status,
            NotificationStatus::Pending | NotificationStatus::Sent
        ) && self.folded_into.is_none()
    }
}

pub fn dedupe_key(recipient_id: &str, activity_id: &str, channel: Channel) -> String {
    format!("{recipient_id}:{activity_id}:{}", channel.as_str())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RouteReport {
    pub recipients_seen: usize,
    pub created: usize,
    pub duplicates: usize,
    pub skipped_disabled: usize,
    pub queued_digest: usize,
    pub sent_immediate: usize,
    pub send_failures: usize,
    pub failed: usize,
}

impl RouteReport {
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Converts one activity into zero or more per-channel notification rows,
/// honoring each recipient's category preference and cadence. Immediate
/// rows are handed to the channel sink right away; digest rows wait for the
/// scheduler.
#[derive(Clone)]
pub struct NotificationRouter {
    activities: Arc<dyn ActivityRepository>,
    follows: Arc<dyn FollowGraph>,
    preferences: PreferenceService,
    notifications: Arc<dyn NotificationRepository>,
    sink: Arc<dyn ChannelSink>,
    follower_page_size: usize,
}

impl NotificationRouter {
    pub fn new(
        activities: Arc<dyn ActivityRepository>,
        follows: Arc<dyn FollowGraph>,
        preferences: PreferenceService,
        notifications: Arc<dyn NotificationRepository>,
        sink: Arc<dyn ChannelSink>,
    ) -> Self {
        Self {
            activities,
            follows,
            preferences,
            notifications,
            sink,
            follower_page_size: DEFAULT_FOLLOWER_PAGE_SIZE,
        }
    }

    pub fn with_follower_page_size(mut self, page_size: usize) -> Self {
        self.follower_page_size = page_size.max(1);
        self
    }

    pub async fn route(&self, activity_id: &str) -> DomainResult<RouteReport> {
        let activity = self
            .activities
            .get(activity_id)
            .await?
            .ok_or(DomainError::NotFound)?;

        let mut report = RouteReport::default();
        // Private activities notify nobody; actors are never notified of
        // their own actions.
        if activity.visibility == Visibility::Private {
            return Ok(report);
        }

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .follows
                .followers_page(&activity.actor_id, cursor.as_deref(), self.follower_page_size)
                .await?;
            for recipient_id in &page.follower_ids {
                if recipient_id == &activity.actor_id {
                    continue;
                }
                report.recipients_seen += 1;
                self.route_one(&activity, recipient_id, &mut report).await;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(report)
    }

    async fn route_one(&self, activity: &Activity, recipient_id: &str, report: &mut RouteReport) {
        let preference = match self
            .preferences
            .resolve(recipient_id, activity.category)
            .await
        {
            Ok(preference) => preference,
            Err(err) => {
                tracing::warn!(
                    activity_id = activity.activity_id,
                    recipient_id,
                    error = %err,
                    "preference lookup failed during routing"
                );
                report.failed += 1;
                return;
            }
        };
        if !preference.enabled {
            report.skipped_disabled += 1;
            return;
        }

        for channel in enabled_channels(&preference) {
            self.deliver_channel(activity, recipient_id, &preference, channel, report)
                .await;
        }
    }

    async fn deliver_channel(
        &self,
        activity: &Activity,
        recipient_id: &str,
        preference: &CategoryPreference,
        channel: Channel,
        report: &mut RouteReport,
    ) {
        let status = match preference.frequency {
            DeliveryFrequency::Immediate => NotificationStatus::Pending,
            DeliveryFrequency::Daily | DeliveryFrequency::Weekly => {
                NotificationStatus::QueuedDigest
            }
        };
        let notification = Notification {
            notification_id: crate::util::uuid_v7_without_dashes(),
            recipient_id: recipient_id.to_string(),
            actor_id: activity.actor_id.clone(),
            actor_username: activity.actor_username.clone(),
            category: activity.category,
            channel,
            title: render_title(activity),
            body: render_body(activity),
            payload: Some(payload_snapshot(activity)),
            status,
            folded_into: None,
            created_at_ms: now_ms(),
            read_at_ms: None,
            dedupe_key: dedupe_key(recipient_id, &activity.activity_id, channel),
        };

        let created = match self.notifications.create(&notification).await {
            Ok(created) => created,
            Err(DomainError::Conflict) => {
                report.duplicates += 1;
                return;
            }
            Err(err) => {
                tracing::warn!(
                    activity_id = activity.activity_id,
                    recipient_id,
                    channel = channel.as_str(),
                    error = %err,
                    "notification insert failed"
                );
                report.failed += 1;
                return;
            }
        };
        report.created += 1;

        if status == NotificationStatus::QueuedDigest {
            report.queued_digest += 1;
            return;
        }

        // Fire-and-forget submit; a failed submit leaves the row pending
        // for the reconciliation sweep rather than blocking other
        // recipients.
        if let Err(err) = self.sink.deliver(&created).await {
            tracing::warn!(
                notification_id = created.notification_id,
                channel = channel.as_str(),
                error = %err,
                "channel submit failed"
            );
            report.send_failures += 1;
            return;
        }
        match self.notifications.mark_sent(&created.notification_id).await {
            Ok(_) => report.sent_immediate += 1,
            Err(err) => {
                tracing::warn!(
                    notification_id = created.notification_id,
                    error = %err,
                    "failed to mark notification sent"
                );
                report.failed += 1;
            }
        }
    }
}

pub fn enabled_channels(preference: &CategoryPreference) -> Vec<Channel> {
    let mut channels = Vec::with_capacity(3);
    if preference.in_app_enabled {
        channels.push(Channel::InApp);
    }
    if preference.email_enabled {
        channels.push(Channel::Email);
    }
    if preference.push_enabled {
        channels.push(Channel::Push);
    }
    channels
}

fn render_title(activity: &Activity) -> String {
    match activity.category {
        ActivityCategory::InterviewPublished => {
            format!("{} published a new interview", activity.actor_username)
        }
        ActivityCategory::CommentPosted => {
            format!("{} posted a comment", activity.actor_username)
        }
        ActivityCategory::InterviewLiked => {
            format!("{} liked an interview", activity.actor_username)
        }
        ActivityCategory::UserFollowed => {
            format!("{} started following someone you follow", activity.actor_username)
        }
        ActivityCategory::System => "System announcement".to_string(),
    }
}

fn render_body(activity: &Activity) -> String {
    format!("{} {}", activity.subject_type, activity.subject_id)
}

fn payload_snapshot(activity: &Activity) -> serde_json::Value {
    serde_json::json!({
        "activity_id": activity.activity_id,
        "category": activity.category.as_str(),
        "subject_type": activity.subject_type,
        "subject_id": activity.subject_id,
        "metadata": activity.metadata,
    })
}

#[derive(Clone, Debug, Default)]
pub struct NotificationFilter {
    pub category: Option<String>,
    pub unread_only: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: usize,
    pub unread_count: usize,
}

/// Read path plus read-state tracking. The unread counter is always
/// recomputed from rows, never adjusted piecemeal.
#[derive(Clone)]
pub struct NotificationService {
    notifications: Arc<dyn NotificationRepository>,
}

impl NotificationService {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }

    pub async fn list(
        &self,
        user_id: &str,
        filter: NotificationFilter,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> DomainResult<NotificationPage> {
        validate_user_id(user_id)?;
        let (offset, limit) = normalize_paging(page, page_size)?;
        let category = match filter.category.as_deref() {
            Some(raw) => Some(ActivityCategory::parse(raw)?),
            None => None,
        };
        let query = NotificationListQuery {
            recipient_id: user_id.to_string(),
            category,
            unread_only: filter.unread_only,
            offset,
            limit,
        };
        let (items, total) = self.notifications.list(&query).await?;
        let unread_count = self.notifications.unread_count(user_id).await?;
        Ok(NotificationPage {
            items,
            total,
            unread_count,
        })
    }

    /// Marking an already-read row again is a no-op; the returned count is
    /// recomputed either way, so it can never double-decrement.
    pub async fn mark_read(&self, user_id: &str, notification_id: &str) -> DomainResult<usize> {
        validate_user_id(user_id)?;
        self.notifications
            .mark_read(user_id, notification_id, now_ms())
            .await?;
        self.notifications.unread_count(user_id).await
    }

    pub async fn mark_all_read(&self, user_id: &str) -> DomainResult<usize> {
        validate_user_id(user_id)?;
        self.notifications.mark_all_read(user_id, now_ms()).await?;
        self.notifications.unread_count(user_id).await
    }

    pub async fn unread_count(&self, user_id: &str) -> DomainResult<usize> {
        validate_user_id(user_id)?;
        self.notifications.unread_count(user_id).await
    }
}

fn validate_user_id(user_id: &str) -> DomainResult<()> {
    if user_id.trim().is_empty() {
        return Err(DomainError::Validation("user_id is required".into()));
    }
    Ok(())
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
    use crate::preferences::CategoryPreference;

    fn preference() -> CategoryPreference {
        CategoryPreference::default_for("user-1", ActivityCategory::InterviewPublished)
    }

    #[test]
    fn enabled_channels_follow_flags() {
        let mut preference = preference();
        assert_eq!(enabled_channels(&preference), vec![Channel::InApp]);
        preference.email_enabled = true;
        preference.push_enabled = true;
        assert_eq!(
            enabled_channels(&preference),
            vec![Channel::InApp, Channel::Email, Channel::Push]
        );
    }

    #[test]
    fn dedupe_key_is_per_channel() {
        let in_app = dedupe_key("user-3", "act-1", Channel::InApp);
        let email = dedupe_key("user-3", "act-1", Channel::Email);
        assert_ne!(in_app, email);
        assert_eq!(in_app, "user-3:act-1:in_app");
    }

    #[test]
    fn folded_rows_are_not_unread() {
        let mut notification = Notification {
            notification_id: "n1".into(),
            recipient_id: "user-1".into(),
            actor_id: "user-2".into(),
            actor_username: "user-2".into(),
            category: ActivityCategory::InterviewPublished,
            channel: Channel::InApp,
            title: "t".into(),
            body: "b".into(),
            payload: None,
            status: NotificationStatus::Sent,
            folded_into: None,
            created_at_ms: 0,
            read_at_ms: None,
            dedupe_key: "k".into(),
        };
        assert!(notification.is_unread());
        notification.folded_into = Some("agg-1".into());
        assert!(!notification.is_unread());
        notification.folded_into = None;
        notification.status = NotificationStatus::Read;
        assert!(!notification.is_unread());
    }
}
