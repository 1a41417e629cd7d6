//! Orchestrator end-to-end scenarios against in-memory gateways.
//!
//! Covers the happy path event sequence, duplicate admission, opt-out,
//! template rejection, broker outage, deadline expiry, cache outage during
//! snapshots, and the recovery loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use herald_broker::InMemoryChannelPublisher;
use herald_cache::{CacheGateway, InMemoryCacheGateway};
use herald_clients::{
    ClientError, StaticTemplateServiceClient, StaticUserServiceClient, UserServiceClient,
};
use herald_common::{
    Channel, ErrorCode, EventType, NotificationStatus, Priority, Template, TemplateVersion,
    UserPreferences,
};
use herald_orchestrator::{
    AdmissionOutcome, NewNotificationRequest, NotificationOrchestrator, RecoveryConfig,
    RecoveryTask,
};
use herald_store::memory::{InMemoryEventRepository, InMemoryNotificationRepository};

fn preferences(email: bool, push: bool) -> UserPreferences {
    UserPreferences {
        email_opt_in: email,
        push_opt_in: push,
        daily_limit: 100,
        language: "en".to_string(),
    }
}

fn template(channels: &[&str]) -> Template {
    Template {
        id: "t-1".to_string(),
        name: "welcome".to_string(),
        event: "signup".to_string(),
        channel: channels.iter().map(|c| c.to_string()).collect(),
        language: "en".to_string(),
        is_active: true,
        versions: vec![TemplateVersion {
            version: 1,
            subject: Some("Hi".to_string()),
            title: None,
            body: "Hello {{name}}".to_string(),
            variables: json!({}),
        }],
    }
}

fn request(key: &str, correlation_id: &str) -> NewNotificationRequest {
    NewNotificationRequest {
        user_id: "u-1".to_string(),
        template_code: "t-1".to_string(),
        channel: Channel::Email,
        priority: Priority::High,
        variables: json!({"name": "A", "link": "https://x"}),
        metadata: json!({}),
        correlation_id: correlation_id.to_string(),
        idempotency_key: key.to_string(),
    }
}

struct Harness {
    orchestrator: Arc<NotificationOrchestrator>,
    notifications: Arc<InMemoryNotificationRepository>,
    events: Arc<InMemoryEventRepository>,
    cache: Arc<InMemoryCacheGateway>,
    publisher: Arc<InMemoryChannelPublisher>,
}

fn harness(
    user_client: Arc<dyn UserServiceClient>,
    template_client: Arc<StaticTemplateServiceClient>,
) -> Harness {
    harness_with_timeout(user_client, template_client, Duration::from_secs(5))
}

fn harness_with_timeout(
    user_client: Arc<dyn UserServiceClient>,
    template_client: Arc<StaticTemplateServiceClient>,
    enrich_timeout: Duration,
) -> Harness {
    let events = Arc::new(InMemoryEventRepository::new());
    let notifications = Arc::new(InMemoryNotificationRepository::with_events(events.clone()));
    let cache = Arc::new(InMemoryCacheGateway::new());
    let publisher = Arc::new(InMemoryChannelPublisher::new());

    let orchestrator = Arc::new(NotificationOrchestrator::new(
        notifications.clone(),
        events.clone(),
        cache.clone(),
        publisher.clone(),
        user_client,
        template_client.clone() as Arc<dyn herald_clients::TemplateServiceClient>,
        enrich_timeout,
    ));

    Harness {
        orchestrator,
        notifications,
        events,
        cache,
        publisher,
    }
}

async fn admit_one(h: &Harness, key: &str, correlation_id: &str) -> herald_common::Notification {
    match h.orchestrator.admit(request(key, correlation_id)).await.unwrap() {
        AdmissionOutcome::Accepted(n) => n,
        AdmissionOutcome::Duplicate { .. } => panic!("expected fresh admission"),
    }
}

#[tokio::test]
async fn happy_path_queues_and_publishes_once() {
    let h = harness(
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(notification.clone()).await;

    let row = h.notifications.snapshot(notification.id).unwrap();
    assert_eq!(row.status, NotificationStatus::Queued);
    assert!(row.enriched_payload.is_some());
    assert!(row.enriched_at.is_some());
    assert!(row.queued_at.is_some());

    assert_eq!(
        h.events.event_types(notification.id),
        vec![EventType::Created, EventType::Enriched, EventType::Queued]
    );

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].correlation_id, "corr-1");
    assert_eq!(published[0].channel, Channel::Email);
    assert_eq!(published[0].template.id, "t-1");

    let snapshot = h.cache.status_of("corr-1").unwrap();
    assert_eq!(snapshot.status, NotificationStatus::Queued);
}

#[tokio::test]
async fn duplicate_submission_reuses_the_original_correlation_id() {
    let h = harness(
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );

    let first = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(first).await;

    match h.orchestrator.admit(request("k1", "corr-2")).await.unwrap() {
        AdmissionOutcome::Duplicate { correlation_id } => {
            assert_eq!(correlation_id, "corr-1");
        }
        AdmissionOutcome::Accepted(_) => panic!("expected duplicate"),
    }

    assert_eq!(h.notifications.len(), 1);
    assert_eq!(h.publisher.publish_count(), 1);
}

#[tokio::test]
async fn cache_false_negative_is_caught_by_the_datastore() {
    let h = harness(
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );

    let first = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(first).await;

    // Simulate cache expiry: the fast path forgets the key entirely.
    let fresh_cache = Arc::new(InMemoryCacheGateway::new());
    let racing = Arc::new(NotificationOrchestrator::new(
        h.notifications.clone() as Arc<dyn herald_store::NotificationRepository>,
        h.events.clone() as Arc<dyn herald_store::NotificationEventRepository>,
        fresh_cache,
        h.publisher.clone() as Arc<dyn herald_broker::ChannelPublisher>,
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
        Duration::from_secs(5),
    ));

    match racing.admit(request("k1", "corr-99")).await.unwrap() {
        AdmissionOutcome::Duplicate { correlation_id } => assert_eq!(correlation_id, "corr-1"),
        AdmissionOutcome::Accepted(_) => panic!("datastore constraint should have caught this"),
    }

    assert_eq!(h.notifications.len(), 1);
    assert_eq!(h.publisher.publish_count(), 1);
}

#[tokio::test]
async fn user_opt_out_fails_without_publishing() {
    let h = harness(
        Arc::new(StaticUserServiceClient::ok(preferences(false, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(notification.clone()).await;

    let row = h.notifications.snapshot(notification.id).unwrap();
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.error_code, Some(ErrorCode::UserFetchError));
    assert!(row.failed_at.is_some());
    assert_eq!(h.publisher.publish_count(), 0);

    assert_eq!(
        h.events.event_types(notification.id),
        vec![EventType::Created, EventType::Failed]
    );
}

#[tokio::test]
async fn declined_template_envelope_fails_with_template_error() {
    let h = harness(
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::failing(ClientError::Declined(
            "template disabled".to_string(),
        ))),
    );

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(notification.clone()).await;

    let row = h.notifications.snapshot(notification.id).unwrap();
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.error_code, Some(ErrorCode::TemplateFetchError));
    assert_eq!(h.publisher.publish_count(), 0);
}

#[tokio::test]
async fn malformed_remote_payload_fails_with_parse_error() {
    let h = harness(
        Arc::new(StaticUserServiceClient::failing(ClientError::Parse(
            "envelope carried no data".to_string(),
        ))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(notification.clone()).await;

    let row = h.notifications.snapshot(notification.id).unwrap();
    assert_eq!(row.error_code, Some(ErrorCode::ParseError));
}

#[tokio::test]
async fn broker_outage_fails_with_queue_error_and_snapshots() {
    let h = harness(
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );
    h.publisher.set_failing(true);

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(notification.clone()).await;

    let row = h.notifications.snapshot(notification.id).unwrap();
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.error_code, Some(ErrorCode::QueueError));
    // Enrichment itself succeeded before the publish attempt.
    assert!(row.enriched_payload.is_some());

    let snapshot = h.cache.status_of("corr-1").unwrap();
    assert_eq!(snapshot.status, NotificationStatus::Failed);
}

struct SlowUserClient;

#[async_trait]
impl UserServiceClient for SlowUserClient {
    async fn fetch_user_preferences(
        &self,
        _user_id: &str,
    ) -> herald_clients::Result<UserPreferences> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(preferences(true, true))
    }
}

#[tokio::test]
async fn deadline_expiry_fails_with_timeout() {
    let h = harness_with_timeout(
        Arc::new(SlowUserClient),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
        Duration::from_millis(50),
    );

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(notification.clone()).await;

    let row = h.notifications.snapshot(notification.id).unwrap();
    assert_eq!(row.status, NotificationStatus::Failed);
    assert_eq!(row.error_code, Some(ErrorCode::Timeout));
    assert_eq!(h.publisher.publish_count(), 0);
}

#[tokio::test]
async fn snapshot_outage_does_not_change_the_row() {
    let h = harness(
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.cache.set_unavailable(true);
    h.orchestrator.enrich_and_publish(notification.clone()).await;

    // The cache write failed, the row still reached queued.
    let row = h.notifications.snapshot(notification.id).unwrap();
    assert_eq!(row.status, NotificationStatus::Queued);
}

#[tokio::test]
async fn recovery_retries_failed_rows_to_queued() {
    // First attempt fails: user service is down for good.
    let h = harness(
        Arc::new(StaticUserServiceClient::failing(ClientError::Transient(
            "connection refused".to_string(),
        ))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
    );

    let notification = admit_one(&h, "k1", "corr-1").await;
    h.orchestrator.enrich_and_publish(notification.clone()).await;
    assert_eq!(
        h.notifications.snapshot(notification.id).unwrap().status,
        NotificationStatus::Failed
    );

    // The service recovers; the recovery loop re-drives the row.
    let healed = Arc::new(NotificationOrchestrator::new(
        h.notifications.clone() as Arc<dyn herald_store::NotificationRepository>,
        h.events.clone() as Arc<dyn herald_store::NotificationEventRepository>,
        h.cache.clone() as Arc<dyn CacheGateway>,
        h.publisher.clone() as Arc<dyn herald_broker::ChannelPublisher>,
        Arc::new(StaticUserServiceClient::ok(preferences(true, false))),
        Arc::new(StaticTemplateServiceClient::ok(template(&["email"]))),
        Duration::from_secs(5),
    ));

    let recovery = RecoveryTask::new(healed, RecoveryConfig::default());
    recovery.recover_once().await;

    // The re-drive runs on a detached task; poll for the terminal state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let status = h.notifications.snapshot(notification.id).unwrap().status;
        if status == NotificationStatus::Queued {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "row never reached queued, stuck at {status}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(h.publisher.publish_count(), 1);
    let types = h.events.event_types(notification.id);
    assert!(types.contains(&EventType::Retried));
    assert!(types.contains(&EventType::Queued));
}
