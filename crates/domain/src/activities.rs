use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::jobs::{
    FanoutActivityPayload, JobDefaults, RouteNotificationsPayload, fanout_job_id, new_job,
    now_ms, route_job_id,
};
use crate::ports::activities::ActivityRepository;
use crate::ports::jobs::{JobQueue, JobType};

const MAX_SUBJECT_TYPE_LENGTH: usize = 64;
const MAX_SUBJECT_ID_LENGTH: usize = 128;
const MAX_METADATA_KEYS: usize = 50;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
    pub username: String,
}

impl ActorIdentity {
    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            user_id: user_id.clone(),
            username: user_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    InterviewPublished,
    CommentPosted,
    InterviewLiked,
    UserFollowed,
    System,
}

/// Categories safe for the anonymous public feed.
pub const PUBLIC_CATEGORIES: &[ActivityCategory] =
    &[ActivityCategory::InterviewPublished, ActivityCategory::System];

pub const ALL_CATEGORIES: &[ActivityCategory] = &[
    ActivityCategory::InterviewPublished,
    ActivityCategory::CommentPosted,
    ActivityCategory::InterviewLiked,
    ActivityCategory::UserFollowed,
    ActivityCategory::System,
];

impl ActivityCategory {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim() {
            "interview_published" => Ok(ActivityCategory::InterviewPublished),
            "comment_posted" => Ok(ActivityCategory::CommentPosted),
            "interview_liked" => Ok(ActivityCategory::InterviewLiked),
            "user_followed" => Ok(ActivityCategory::UserFollowed),
            "system" => Ok(ActivityCategory::System),
            other => Err(DomainError::InvalidCategory(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityCategory::InterviewPublished => "interview_published",
            ActivityCategory::CommentPosted => "comment_posted",
            ActivityCategory::InterviewLiked => "interview_liked",
            ActivityCategory::UserFollowed => "user_followed",
            ActivityCategory::System => "system",
        }
    }

    pub fn is_public(&self) -> bool {
        PUBLIC_CATEGORIES.contains(self)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Activity {
    pub activity_id: String,
    pub actor_id: String,
    pub actor_username: String,
    pub category: ActivityCategory,
    pub subject_type: String,
    pub subject_id: String,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub visibility: Visibility,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct ActivityCreate {
    pub category: String,
    pub subject_type: String,
    pub subject_id: String,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub visibility: Visibility,
}

/// Single entry point for "something happened". Persists the activity row
/// synchronously, then hands fan-out and notification routing to the job
/// queue; callers must not expect their feed entry to be visible the moment
/// this returns.
#[derive(Clone)]
pub struct ActivityService {
    repository: Arc<dyn ActivityRepository>,
    jobs: Arc<dyn JobQueue>,
    job_defaults: JobDefaults,
}

impl ActivityService {
    pub fn new(repository: Arc<dyn ActivityRepository>, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            repository,
            jobs,
            job_defaults: JobDefaults::default(),
        }
    }

    pub async fn record(
        &self,
        actor: ActorIdentity,
        correlation_id: String,
        input: ActivityCreate,
    ) -> DomainResult<Activity> {
        let (category, payload) = validate_activity_create(&input)?;
        let activity = Activity {
            activity_id: crate::util::uuid_v7_without_dashes(),
            actor_id: actor.user_id,
            actor_username: actor.username,
            category,
            subject_type: payload.subject_type,
            subject_id: payload.subject_id,
            metadata: payload.metadata,
            visibility: payload.visibility,
            created_at_ms: now_ms(),
        };
        let activity = self.repository.create(&activity).await?;
        self.dispatch_background(&activity, &correlation_id).await;
        Ok(activity)
    }

    pub async fn get(&self, activity_id: &str) -> DomainResult<Activity> {
        self.repository
            .get(activity_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    /// Enqueue failures are logged, never surfaced: the activity row is
    /// already durable and a reconciliation sweep can replay delivery.
    async fn dispatch_background(&self, activity: &Activity, correlation_id: &str) {
        let fanout = new_job(
            fanout_job_id(&activity.activity_id),
            JobType::FanoutActivity,
            serde_json::json!(FanoutActivityPayload {
                activity_id: activity.activity_id.clone(),
            }),
            activity.activity_id.clone(),
            correlation_id.to_string(),
            self.job_defaults.clone(),
        );
        if let Err(err) = self.jobs.enqueue(&fanout).await {
            tracing::warn!(
                activity_id = activity.activity_id,
                error = %err,
                "failed to enqueue fan-out job"
            );
        }

        let route = new_job(
            route_job_id(&activity.activity_id),
            JobType::RouteNotifications,
            serde_json::json!(RouteNotificationsPayload {
                activity_id: activity.activity_id.clone(),
            }),
            activity.activity_id.clone(),
            correlation_id.to_string(),
            self.job_defaults.clone(),
        );
        if let Err(err) = self.jobs.enqueue(&route).await {
            tracing::warn!(
                activity_id = activity.activity_id,
                error = %err,
                "failed to enqueue notification-route job"
            );
        }
    }
}

fn validate_activity_create(
    input: &ActivityCreate,
) -> Result<(ActivityCategory, ActivityCreate), DomainError> {
    let category = ActivityCategory::parse(&input.category)?;

    let subject_type = input.subject_type.trim();
    if subject_type.is_empty() {
        return Err(DomainError::Validation("subject_type is required".into()));
    }
    if subject_type.chars().count() > MAX_SUBJECT_TYPE_LENGTH {
        return Err(DomainError::Validation(format!(
            "subject_type exceeds max length of {MAX_SUBJECT_TYPE_LENGTH}"
        )));
    }

    let subject_id = input.subject_id.trim();
    if subject_id.is_empty() {
        return Err(DomainError::Validation("subject_id is required".into()));
    }
    if subject_id.chars().count() > MAX_SUBJECT_ID_LENGTH {
        return Err(DomainError::Validation(format!(
            "subject_id exceeds max length of {MAX_SUBJECT_ID_LENGTH}"
        )));
    }

    if input
        .metadata
        .as_ref()
        .is_some_and(|metadata| metadata.len() > MAX_METADATA_KEYS)
    {
        return Err(DomainError::Validation(format!(
            "metadata exceeds max of {MAX_METADATA_KEYS} keys"
        )));
    }

    Ok((
        category,
        ActivityCreate {
            category: input.category.clone(),
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
            metadata: input.metadata.clone(),
            visibility: input.visibility,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_input(category: &str) -> ActivityCreate {
        ActivityCreate {
            category: category.to_string(),
            subject_type: "interview".to_string(),
            subject_id: "interview-99".to_string(),
            metadata: None,
            visibility: Visibility::Public,
        }
    }

    #[test]
    fn category_parse_round_trips_known_values() {
        for category in ALL_CATEGORIES {
            assert_eq!(
                ActivityCategory::parse(category.as_str()).unwrap(),
                *category
            );
        }
    }

    #[test]
    fn category_parse_rejects_unknown_value() {
        let err = ActivityCategory::parse("carrier_pigeon").unwrap_err();
        assert!(matches!(err, DomainError::InvalidCategory(_)));
    }

    #[test]
    fn validate_rejects_unknown_category() {
        let result = validate_activity_create(&create_input("carrier_pigeon"));
        assert!(matches!(result, Err(DomainError::InvalidCategory(_))));
    }

    #[test]
    fn validate_rejects_blank_subject() {
        let mut input = create_input("interview_published");
        input.subject_id = "   ".to_string();
        assert!(validate_activity_create(&input).is_err());
    }

    #[test]
    fn validate_trims_subject_fields() {
        let mut input = create_input("comment_posted");
        input.subject_type = " comment ".to_string();
        let (_, payload) = validate_activity_create(&input).unwrap();
        assert_eq!(payload.subject_type, "comment");
    }

    #[test]
    fn public_allow_list_excludes_social_categories() {
        assert!(ActivityCategory::InterviewPublished.is_public());
        assert!(!ActivityCategory::InterviewLiked.is_public());
        assert!(!ActivityCategory::UserFollowed.is_public());
    }
}
