use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::body::to_bytes;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use ripple_infra::config::AppConfig;
use ripple_infra::repositories::InMemoryJobQueue;
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::routes;
use crate::state::AppState;

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: usize,
}

fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        data_backend: "memory".to_string(),
        store_endpoint: "postgres://127.0.0.1:5432".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        jwt_secret: "test-secret".to_string(),
        auth_dev_bypass_enabled: false,
        fanout_page_size: 200,
        fanout_concurrency: 16,
        digest_sweep_interval_ms: 3_600_000,
        worker_queue_prefix: "ripple:jobs".to_string(),
        worker_poll_interval_ms: 1000,
        worker_promote_batch: 10,
        worker_backoff_base_ms: 1000,
        worker_backoff_max_ms: 60000,
    }
}

fn test_token(secret: &str, sub: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_secs();
    let claims = Claims {
        sub: sub.to_string(),
        exp: (now + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token")
}

fn test_app() -> axum::Router {
    test_app_with_queue().1
}

fn test_app_with_queue() -> (Arc<InMemoryJobQueue>, axum::Router) {
    let queue = Arc::new(InMemoryJobQueue::new());
    let state = AppState::with_job_queue(test_config(), queue.clone());
    (queue, routes::router(state))
}

fn authed_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let token = test_token("test-secret", "user-7");
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["environment"], json!("test"));
}

#[tokio::test]
async fn protected_routes_require_auth() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/feed")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], json!("unauthorized"));
}

#[tokio::test]
async fn record_activity_returns_created_and_enqueues_delivery() {
    let (queue, app) = test_app_with_queue();
    let response = app
        .oneshot(authed_request(
            "POST",
            "/v1/activities",
            Some(json!({
                "category": "interview_published",
                "subject_type": "interview",
                "subject_id": "interview-99",
                "visibility": "public"
            })),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["actor_id"], json!("user-7"));
    assert_eq!(body["category"], json!("interview_published"));
    assert!(body["activity_id"].as_str().is_some_and(|id| !id.is_empty()));
    // One fan-out job and one routing job behind every write.
    assert_eq!(queue.ready_len().await, 2);
}

#[tokio::test]
async fn record_activity_rejects_unknown_category() {
    let app = test_app();
    let response = app
        .oneshot(authed_request(
            "POST",
            "/v1/activities",
            Some(json!({
                "category": "carrier_pigeon",
                "subject_type": "interview",
                "subject_id": "interview-99"
            })),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], json!("invalid_category"));
}

#[tokio::test]
async fn personal_feed_starts_empty() {
    let app = test_app();
    let response = app
        .oneshot(authed_request("GET", "/v1/feed?page=1&page_size=10", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["total"], json!(0));
    assert_eq!(body["entries"], json!([]));
}

#[tokio::test]
async fn public_feed_allows_anonymous_callers() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/feed/public")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["total"], json!(0));
}

#[tokio::test]
async fn feed_rejects_zero_page() {
    let app = test_app();
    let response = app
        .oneshot(authed_request("GET", "/v1/feed?page=0", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], json!("validation_error"));
}

#[tokio::test]
async fn preferences_round_trip() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(authed_request("GET", "/v1/preferences", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let preferences = body["preferences"].as_object().expect("map");
    assert_eq!(preferences.len(), 5);
    assert_eq!(
        preferences["interview_published"]["frequency"],
        json!("immediate")
    );
    assert_eq!(
        preferences["interview_published"]["channels"]["in_app"],
        json!(true)
    );

    let response = app
        .clone()
        .oneshot(authed_request(
            "PUT",
            "/v1/preferences",
            Some(json!({
                "preferences": {
                    "interview_published": {
                        "enabled": true,
                        "channels": {"in_app": true, "email": true, "push": false},
                        "frequency": "weekly"
                    }
                }
            })),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(
        body["preferences"]["interview_published"]["frequency"],
        json!("weekly")
    );
    assert_eq!(
        body["preferences"]["interview_published"]["channels"]["email"],
        json!(true)
    );
    // Untouched categories keep their defaults.
    assert_eq!(
        body["preferences"]["comment_posted"]["frequency"],
        json!("immediate")
    );
}

#[tokio::test]
async fn preferences_reject_unknown_frequency() {
    let app = test_app();
    let response = app
        .oneshot(authed_request(
            "PUT",
            "/v1/preferences",
            Some(json!({
                "preferences": {
                    "interview_published": {
                        "enabled": true,
                        "channels": {"in_app": true, "email": false, "push": false},
                        "frequency": "hourly"
                    }
                }
            })),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], json!("validation_error"));
}

#[tokio::test]
async fn notifications_list_and_mark_all_read() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(authed_request("GET", "/v1/notifications", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["total"], json!(0));
    assert_eq!(body["unread_count"], json!(0));

    let response = app
        .oneshot(authed_request("POST", "/v1/notifications/read-all", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["unread_count"], json!(0));
}

#[tokio::test]
async fn mark_read_of_unknown_notification_is_not_found() {
    let app = test_app();
    let response = app
        .oneshot(authed_request(
            "POST",
            "/v1/notifications/missing-notification/read",
            None,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], json!("not_found"));
}

#[tokio::test]
async fn notifications_reject_unknown_category_filter() {
    let app = test_app();
    let response = app
        .oneshot(authed_request(
            "GET",
            "/v1/notifications?category=carrier_pigeon",
            None,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], json!("invalid_category"));
}
