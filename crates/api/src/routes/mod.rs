use std::collections::HashMap;

use axum::extract::{Extension, Path, Query, State};
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use ripple_domain::activities::{Activity, ActivityCreate, ActorIdentity, Visibility};
use ripple_domain::feed::FeedPage;
use ripple_domain::notifications::{NotificationFilter, NotificationPage};
use ripple_domain::ports::db::StoreAdapter;
use ripple_domain::preferences::{CategoryPreference, PreferenceUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::middleware::{AuthContext, CorrelationId};
use crate::observability;
use crate::{error::ApiError, middleware as app_middleware, state::AppState};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/activities", post(record_activity))
        .route("/v1/feed", get(get_personal_feed))
        .route("/v1/notifications", get(list_notifications))
        .route(
            "/v1/notifications/:notification_id/read",
            post(mark_notification_read),
        )
        .route("/v1/notifications/read-all", post(mark_all_notifications_read))
        .route(
            "/v1/preferences",
            get(get_preferences).put(update_preferences),
        )
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/health/store", get(store_health))
        .route("/metrics", get(metrics))
        .route("/v1/feed/public", get(get_public_feed))
        .merge(protected)
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

fn validate_payload<T: Validate>(value: &T) -> Result<(), ApiError> {
    value
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))
}

fn require_actor(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    match (&auth.user_id, &auth.username) {
        (Some(user_id), Some(username)) if auth.is_authenticated => Ok(ActorIdentity {
            user_id: user_id.clone(),
            username: username.clone(),
        }),
        _ => Err(ApiError::Unauthorized),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

#[derive(Serialize)]
struct StoreHealthResponse {
    backend: String,
    store: &'static str,
}

async fn store_health(State(state): State<AppState>) -> Json<StoreHealthResponse> {
    let store = if state.config.data_backend.eq_ignore_ascii_case("memory") {
        "memory"
    } else {
        match state.store.health_check().await {
            Ok(()) => "ok",
            Err(err) => {
                tracing::warn!(error = %err, "store health probe failed");
                "unreachable"
            }
        }
    };
    Json(StoreHealthResponse {
        backend: state.config.data_backend.clone(),
        store,
    })
}

async fn metrics() -> impl IntoResponse {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct RecordActivityRequest {
    #[validate(length(min = 1, max = 64))]
    category: String,
    #[validate(length(min = 1, max = 64))]
    subject_type: String,
    #[validate(length(min = 1, max = 128))]
    subject_id: String,
    metadata: Option<HashMap<String, Value>>,
    visibility: Option<String>,
}

fn parse_visibility(raw: Option<&str>) -> Result<Visibility, ApiError> {
    match raw.unwrap_or("public") {
        "public" => Ok(Visibility::Public),
        "private" => Ok(Visibility::Private),
        other => Err(ApiError::Validation(format!(
            "unknown visibility: {other}"
        ))),
    }
}

/// Feed and notification delivery are eventually consistent: the activity
/// row is durable once this returns, but fan-out happens in the background.
async fn record_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(correlation): Extension<CorrelationId>,
    Json(payload): Json<RecordActivityRequest>,
) -> Result<(StatusCode, Json<Activity>), ApiError> {
    validate_payload(&payload)?;
    let actor = require_actor(&auth)?;
    let visibility = parse_visibility(payload.visibility.as_deref())?;

    let activity = state
        .activities
        .record(
            actor,
            correlation.0,
            ActivityCreate {
                category: payload.category,
                subject_type: payload.subject_type,
                subject_id: payload.subject_id,
                metadata: payload.metadata,
                visibility,
            },
        )
        .await?;
    observability::register_activity_recorded(
        activity.category.as_str(),
        match activity.visibility {
            Visibility::Public => "public",
            Visibility::Private => "private",
        },
    );
    Ok((StatusCode::CREATED, Json(activity)))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn get_personal_feed(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<FeedPage>, ApiError> {
    let actor = require_actor(&auth)?;
    let feed = state
        .feed
        .personal_feed(&actor.user_id, query.page, query.page_size)
        .await?;
    Ok(Json(feed))
}

async fn get_public_feed(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<FeedPage>, ApiError> {
    let feed = state.feed.public_feed(query.page, query.page_size).await?;
    Ok(Json(feed))
}

#[derive(Debug, Deserialize)]
struct NotificationsQuery {
    category: Option<String>,
    unread_only: Option<bool>,
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn list_notifications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<NotificationPage>, ApiError> {
    let actor = require_actor(&auth)?;
    let page = state
        .notifications
        .list(
            &actor.user_id,
            NotificationFilter {
                category: query.category,
                unread_only: query.unread_only.unwrap_or(false),
            },
            query.page,
            query.page_size,
        )
        .await?;
    Ok(Json(page))
}

#[derive(Serialize)]
struct UnreadCountResponse {
    unread_count: usize,
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(notification_id): Path<String>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let actor = require_actor(&auth)?;
    let unread_count = state
        .notifications
        .mark_read(&actor.user_id, &notification_id)
        .await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let actor = require_actor(&auth)?;
    let unread_count = state.notifications.mark_all_read(&actor.user_id).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelFlags {
    in_app: bool,
    email: bool,
    push: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct PreferencePayload {
    enabled: bool,
    channels: ChannelFlags,
    frequency: String,
}

#[derive(Serialize)]
struct PreferencesResponse {
    preferences: HashMap<String, PreferencePayload>,
}

fn to_preferences_response(preferences: Vec<CategoryPreference>) -> PreferencesResponse {
    let preferences = preferences
        .into_iter()
        .map(|preference| {
            (
                preference.category.as_str().to_string(),
                PreferencePayload {
                    enabled: preference.enabled,
                    channels: ChannelFlags {
                        in_app: preference.in_app_enabled,
                        email: preference.email_enabled,
                        push: preference.push_enabled,
                    },
                    frequency: preference.frequency.as_str().to_string(),
                },
            )
        })
        .collect();
    PreferencesResponse { preferences }
}

async fn get_preferences(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<PreferencesResponse>, ApiError> {
    let actor = require_actor(&auth)?;
    let preferences = state.preferences.get_all(&actor.user_id).await?;
    Ok(Json(to_preferences_response(preferences)))
}

#[derive(Debug, Deserialize)]
struct UpdatePreferencesRequest {
    preferences: HashMap<String, PreferencePayload>,
}

async fn update_preferences(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<UpdatePreferencesRequest>,
) -> Result<Json<PreferencesResponse>, ApiError> {
    let actor = require_actor(&auth)?;
    let updates: Vec<PreferenceUpdate> = payload
        .preferences
        .into_iter()
        .map(|(category, preference)| PreferenceUpdate {
            category,
            enabled: preference.enabled,
            in_app_enabled: preference.channels.in_app,
            email_enabled: preference.channels.email,
            push_enabled: preference.channels.push,
            frequency: preference.frequency,
        })
        .collect();
    let preferences = state.preferences.update(&actor.user_id, updates).await?;
    Ok(Json(to_preferences_response(preferences)))
}
