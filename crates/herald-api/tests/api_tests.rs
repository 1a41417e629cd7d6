//! HTTP boundary tests against in-memory gateways.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use herald_api::{create_router, AppState, HealthProbe};
use herald_broker::InMemoryChannelPublisher;
use herald_cache::InMemoryCacheGateway;
use herald_clients::{StaticTemplateServiceClient, StaticUserServiceClient};
use herald_common::{NotificationStatus, Template, TemplateVersion, UserPreferences};
use herald_orchestrator::NotificationOrchestrator;
use herald_store::memory::{InMemoryEventRepository, InMemoryNotificationRepository};

struct StaticProbe(bool);

#[async_trait::async_trait]
impl HealthProbe for StaticProbe {
    async fn check(&self) -> Result<(), String> {
        if self.0 {
            Ok(())
        } else {
            Err("connection refused".to_string())
        }
    }
}

struct Harness {
    state: AppState,
    notifications: Arc<InMemoryNotificationRepository>,
    publisher: Arc<InMemoryChannelPublisher>,
}

fn harness() -> Harness {
    harness_with_health(true, true)
}

fn harness_with_health(database_up: bool, cache_up: bool) -> Harness {
    let events = Arc::new(InMemoryEventRepository::new());
    let notifications = Arc::new(InMemoryNotificationRepository::with_events(events.clone()));
    let cache = Arc::new(InMemoryCacheGateway::new());
    let publisher = Arc::new(InMemoryChannelPublisher::new());

    let orchestrator = Arc::new(NotificationOrchestrator::new(
        notifications.clone(),
        events,
        cache,
        publisher.clone(),
        Arc::new(StaticUserServiceClient::ok(UserPreferences {
            email_opt_in: true,
            push_opt_in: true,
            daily_limit: 100,
            language: "en".to_string(),
        })),
        Arc::new(StaticTemplateServiceClient::ok(Template {
            id: "t-1".to_string(),
            name: "welcome".to_string(),
            event: "signup".to_string(),
            channel: vec!["email".to_string(), "push".to_string()],
            language: "en".to_string(),
            is_active: true,
            versions: vec![TemplateVersion {
                version: 1,
                subject: Some("Hi".to_string()),
                title: None,
                body: "Hello {{name}}".to_string(),
                variables: json!({}),
            }],
        })),
        Duration::from_secs(5),
    ));

    let state = AppState {
        orchestrator,
        database_probe: Arc::new(StaticProbe(database_up)),
        cache_probe: Arc::new(StaticProbe(cache_up)),
    };

    Harness {
        state,
        notifications,
        publisher,
    }
}

fn ingest_body() -> Value {
    json!({
        "notification_type": "email",
        "user_id": "u-1",
        "template_code": "t-1",
        "variables": {"name": "A", "link": "https://x"},
        "request_id": "r1",
        "priority": 2
    })
}

async fn post_notification(h: &Harness, body: Value, idempotency_key: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/notification")
        .header("content-type", "application/json");
    if let Some(key) = idempotency_key {
        request = request.header("X-Idempotency-Key", key);
    }

    let response = create_router(h.state.clone())
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get_json(h: &Harness, uri: &str) -> (StatusCode, Value) {
    let response = create_router(h.state.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn wait_for_status(
    h: &Harness,
    id: uuid::Uuid,
    expected: NotificationStatus,
) -> herald_common::Notification {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let row = h.notifications.snapshot(id).unwrap();
        if row.status == expected {
            return row;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "row stuck at {} waiting for {expected}",
            row.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn accepts_and_processes_a_notification() {
    let h = harness();

    let (status, body) = post_notification(&h, ingest_body(), Some("k1")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["idempotency_key"], "k1");
    let correlation_id = body["data"]["correlation_id"].as_str().unwrap().to_string();

    // Exactly one row; the detached task drives it to queued.
    assert_eq!(h.notifications.len(), 1);
    let row = h
        .notifications
        .snapshot(h.publisher_first_id(&correlation_id).await)
        .unwrap();
    let row = wait_for_status(&h, row.id, NotificationStatus::Queued).await;
    assert_eq!(row.correlation_id, correlation_id);
    assert_eq!(h.publisher.publish_count(), 1);
}

impl Harness {
    /// Resolve the row id for a correlation id.
    async fn publisher_first_id(&self, correlation_id: &str) -> uuid::Uuid {
        use herald_store::NotificationRepository;
        self.notifications
            .get_by_correlation_id(correlation_id)
            .await
            .unwrap()
            .unwrap()
            .id
    }
}

#[tokio::test]
async fn duplicate_submission_answers_200_with_original_correlation_id() {
    let h = harness();

    let (first_status, first) = post_notification(&h, ingest_body(), Some("k1")).await;
    assert_eq!(first_status, StatusCode::ACCEPTED);
    let original = first["data"]["correlation_id"].as_str().unwrap().to_string();

    let (second_status, second) = post_notification(&h, ingest_body(), Some("k1")).await;
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(second["data"]["correlation_id"], original.as_str());

    assert_eq!(h.notifications.len(), 1);
}

#[tokio::test]
async fn missing_idempotency_header_is_a_400() {
    let h = harness();
    let (status, body) = post_notification(&h, ingest_body(), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_channel_is_a_400() {
    let h = harness();
    let mut body = ingest_body();
    body["notification_type"] = json!("sms");

    let (status, response) = post_notification(&h, body, Some("k1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("unknown channel"));
    assert_eq!(h.notifications.len(), 0);
}

#[tokio::test]
async fn missing_required_field_is_a_400() {
    let h = harness();
    let mut body = ingest_body();
    body.as_object_mut().unwrap().remove("user_id");

    let (status, response) = post_notification(&h, body, Some("k1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn status_endpoint_reads_the_snapshot() {
    let h = harness();
    let (_, body) = post_notification(&h, ingest_body(), Some("k1")).await;
    let correlation_id = body["data"]["correlation_id"].as_str().unwrap().to_string();

    let id = h.publisher_first_id(&correlation_id).await;
    wait_for_status(&h, id, NotificationStatus::Queued).await;

    let (status, body) = get_json(&h, &format!("/notification/status/{correlation_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "queued");
}

#[tokio::test]
async fn unknown_correlation_id_is_a_404() {
    let h = harness();
    let (status, body) = get_json(&h, "/notification/status/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn worker_callbacks_walk_the_state_machine() {
    let h = harness();
    let (_, body) = post_notification(&h, ingest_body(), Some("k1")).await;
    let correlation_id = body["data"]["correlation_id"].as_str().unwrap().to_string();
    let id = h.publisher_first_id(&correlation_id).await;
    wait_for_status(&h, id, NotificationStatus::Queued).await;

    for (next, extra) in [
        ("processing", json!({})),
        (
            "sent",
            json!({"provider": "smtp", "provider_message_id": "m-1"}),
        ),
        ("delivered", json!({})),
    ] {
        let mut callback = json!({"status": next});
        callback
            .as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());

        let response = create_router(h.state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/notification/{id}/status"))
                    .header("content-type", "application/json")
                    .body(Body::from(callback.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "callback to {next}");
    }

    let row = h.notifications.snapshot(id).unwrap();
    assert_eq!(row.status, NotificationStatus::Delivered);
    assert_eq!(row.provider.as_deref(), Some("smtp"));
    assert!(row.sent_at.is_some());
    assert!(row.delivered_at.is_some());
}

#[tokio::test]
async fn illegal_callback_transition_is_a_409() {
    let h = harness();
    let (_, body) = post_notification(&h, ingest_body(), Some("k1")).await;
    let correlation_id = body["data"]["correlation_id"].as_str().unwrap().to_string();
    let id = h.publisher_first_id(&correlation_id).await;
    wait_for_status(&h, id, NotificationStatus::Queued).await;

    // queued -> delivered skips processing/sent.
    let response = create_router(h.state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/notification/{id}/status"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"status": "delivered"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn listing_pages_with_cursor_and_meta() {
    let h = harness();
    for i in 0..3 {
        let mut body = ingest_body();
        body["user_id"] = json!("u-list");
        let (status, _) = post_notification(&h, body, Some(&format!("k-{i}"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, body) = get_json(&h, "/notifications?user_id=u-list&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["meta"]["limit"], 2);
    assert_eq!(body["meta"]["has_next"], true);
    assert_eq!(body["meta"]["has_previous"], false);
    assert!(body["data"]["next_cursor"].is_string());
}

#[tokio::test]
async fn soft_delete_hides_the_row() {
    let h = harness();
    let (_, body) = post_notification(&h, ingest_body(), Some("k1")).await;
    let correlation_id = body["data"]["correlation_id"].as_str().unwrap().to_string();
    let id = h.publisher_first_id(&correlation_id).await;

    let response = create_router(h.state.clone())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/notification/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = get_json(&h, &format!("/notification/{id}/events")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_both_dependencies() {
    let h = harness();
    let (status, body) = get_json(&h, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["status"], "up");
    assert_eq!(body["checks"]["redis"]["status"], "up");
}

#[tokio::test]
async fn health_degrades_to_503_when_a_dependency_is_down() {
    let h = harness_with_health(true, false);
    let (status, body) = get_json(&h, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["redis"]["status"], "down");
}

#[tokio::test]
async fn probes_answer() {
    let h = harness();
    let (status, body) = get_json(&h, "/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "LIVE");

    let (status, body) = get_json(&h, "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "READY");
}
