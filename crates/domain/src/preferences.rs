use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::activities::{ALL_CATEGORIES, ActivityCategory};
use crate::error::DomainError;
use crate::ports::preferences::PreferenceRepository;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFrequency {
    Immediate,
    Daily,
    Weekly,
}

impl DeliveryFrequency {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim() {
            "immediate" => Ok(DeliveryFrequency::Immediate),
            "daily" => Ok(DeliveryFrequency::Daily),
            "weekly" => Ok(DeliveryFrequency::Weekly),
            other => Err(DomainError::Validation(format!(
                "unknown delivery frequency: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryFrequency::Immediate => "immediate",
            DeliveryFrequency::Daily => "daily",
            DeliveryFrequency::Weekly => "weekly",
        }
    }

    /// Digest accumulation window; zero for immediate delivery.
    pub fn window_ms(&self) -> i64 {
        match self {
            DeliveryFrequency::Immediate => 0,
            DeliveryFrequency::Daily => 24 * 60 * 60 * 1000,
            DeliveryFrequency::Weekly => 7 * 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CategoryPreference {
    pub user_id: String,
    pub category: ActivityCategory,
    pub enabled: bool,
    pub in_app_enabled: bool,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub frequency: DeliveryFrequency,
}

impl CategoryPreference {
    /// The default applied when a user has never touched a category:
    /// enabled, in-app only, delivered immediately.
    pub fn default_for(user_id: &str, category: ActivityCategory) -> Self {
        Self {
            user_id: user_id.to_string(),
            category,
            enabled: true,
            in_app_enabled: true,
            email_enabled: false,
            push_enabled: false,
            frequency: DeliveryFrequency::Immediate,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PreferenceUpdate {
    pub category: String,
    pub enabled: bool,
    pub in_app_enabled: bool,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub frequency: String,
}

#[derive(Clone)]
pub struct PreferenceService {
    repository: Arc<dyn PreferenceRepository>,
}

impl PreferenceService {
    pub fn new(repository: Arc<dyn PreferenceRepository>) -> Self {
        Self { repository }
    }

    /// Stored rows merged over the per-category defaults, so every known
    /// category is always present in the response.
    pub async fn get_all(&self, user_id: &str) -> DomainResult<Vec<CategoryPreference>> {
        validate_user_id(user_id)?;
        let stored = self.repository.list_for_user(user_id).await?;
        let mut merged = Vec::with_capacity(ALL_CATEGORIES.len());
        for category in ALL_CATEGORIES {
            let preference = stored
                .iter()
                .find(|preference| preference.category == *category)
                .cloned()
                .unwrap_or_else(|| CategoryPreference::default_for(user_id, *category));
            merged.push(preference);
        }
        Ok(merged)
    }

    pub async fn update(
        &self,
        user_id: &str,
        updates: Vec<PreferenceUpdate>,
    ) -> DomainResult<Vec<CategoryPreference>> {
        validate_user_id(user_id)?;
        if updates.is_empty() {
            return Err(DomainError::Validation(
                "at least one preference entry is required".into(),
            ));
        }

        let mut validated = Vec::with_capacity(updates.len());
        for update in &updates {
            validated.push(validate_preference_update(user_id, update)?);
        }

        for preference in &validated {
            self.repository.upsert(preference).await?;
        }
        self.get_all(user_id).await
    }

    /// Effective preference for one `(user, category)` pair. Used by both
    /// the write-time filter (fan-out, routing) and the read-time re-filter
    /// (feed assembly).
    pub async fn resolve(
        &self,
        user_id: &str,
        category: ActivityCategory,
    ) -> DomainResult<CategoryPreference> {
        Ok(self
            .repository
            .get(user_id, &category)
            .await?
            .unwrap_or_else(|| CategoryPreference::default_for(user_id, category)))
    }
}

fn validate_user_id(user_id: &str) -> DomainResult<()> {
    if user_id.trim().is_empty() {
        return Err(DomainError::Validation("user_id is required".into()));
    }
    Ok(())
}

fn validate_preference_update(
    user_id: &str,
    update: &PreferenceUpdate,
) -> DomainResult<CategoryPreference> {
    let category = ActivityCategory::parse(&update.category)?;
    let frequency = DeliveryFrequency::parse(&update.frequency)?;
    if update.enabled && !(update.in_app_enabled || update.email_enabled || update.push_enabled) {
        return Err(DomainError::Validation(format!(
            "category {} is enabled but has no delivery channel",
            category.as_str()
        )));
    }
    Ok(CategoryPreference {
        user_id: user_id.to_string(),
        category,
        enabled: update.enabled,
        in_app_enabled: update.in_app_enabled,
        email_enabled: update.email_enabled,
        push_enabled: update.push_enabled,
        frequency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_for(category: &str) -> PreferenceUpdate {
        PreferenceUpdate {
            category: category.to_string(),
            enabled: true,
            in_app_enabled: true,
            email_enabled: false,
            push_enabled: false,
            frequency: "immediate".to_string(),
        }
    }

    #[test]
    fn frequency_parse_rejects_unknown_cadence() {
        assert!(DeliveryFrequency::parse("hourly").is_err());
        assert_eq!(
            DeliveryFrequency::parse("weekly").unwrap(),
            DeliveryFrequency::Weekly
        );
    }

    #[test]
    fn weekly_window_is_seven_days() {
        assert_eq!(
            DeliveryFrequency::Weekly.window_ms(),
            7 * DeliveryFrequency::Daily.window_ms()
        );
    }

    #[test]
    fn validate_update_rejects_unknown_category() {
        let result = validate_preference_update("user-1", &update_for("smoke_signal"));
        assert!(matches!(result, Err(DomainError::InvalidCategory(_))));
    }

    #[test]
    fn validate_update_rejects_enabled_without_channel() {
        let mut update = update_for("interview_published");
        update.in_app_enabled = false;
        let result = validate_preference_update("user-1", &update);
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn disabled_category_needs_no_channel() {
        let mut update = update_for("interview_published");
        update.enabled = false;
        update.in_app_enabled = false;
        assert!(validate_preference_update("user-1", &update).is_ok());
    }

    #[test]
    fn default_preference_is_in_app_immediate() {
        let preference =
            CategoryPreference::default_for("user-1", ActivityCategory::CommentPosted);
        assert!(preference.enabled);
        assert!(preference.in_app_enabled);
        assert!(!preference.email_enabled);
        assert_eq!(preference.frequency, DeliveryFrequency::Immediate);
    }
}
