//! Admission and enrichment: the notification state machine driver.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use herald_broker::ChannelPublisher;
use herald_cache::CacheGateway;
use herald_clients::{ClientError, TemplateServiceClient, UserServiceClient};
use herald_common::{
    Channel, EnrichedNotification, ErrorCode, EventType, Notification, NotificationEvent,
    NotificationStatus, Priority, StatusSnapshot, Template, UserPreferences,
};
use herald_store::{created_event, NotificationEventRepository, NotificationRepository};

/// A validated request, ready for admission.
#[derive(Debug, Clone)]
pub struct NewNotificationRequest {
    pub user_id: String,
    pub template_code: String,
    pub channel: Channel,
    pub priority: Priority,
    pub variables: Value,
    pub metadata: Value,
    pub correlation_id: String,
    pub idempotency_key: String,
}

/// What admission resolved to.
#[derive(Debug)]
pub enum AdmissionOutcome {
    /// A fresh row was created; enrichment should be dispatched.
    Accepted(Notification),
    /// The idempotency key already has a notification inside the 24h
    /// window; `correlation_id` is the original one.
    Duplicate { correlation_id: String },
}

/// Infrastructure failures during admission (the caller answers 500).
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Cache(#[from] herald_cache::CacheError),

    #[error(transparent)]
    Store(#[from] herald_store::StoreError),
}

/// Where enrichment failed; tagged onto the `failed` event.
#[derive(Debug, Clone, Copy)]
enum FailureStage {
    User,
    Template,
    Queue,
    Timeout,
}

impl FailureStage {
    fn as_str(&self) -> &'static str {
        match self {
            FailureStage::User => "user_fetch",
            FailureStage::Template => "template_fetch",
            FailureStage::Queue => "queue_publish",
            FailureStage::Timeout => "timeout",
        }
    }
}

/// The orchestrator service. Cheap to clone behind an `Arc`; every
/// collaborator is a trait object so tests swap in in-memory doubles.
pub struct NotificationOrchestrator {
    notifications: Arc<dyn NotificationRepository>,
    events: Arc<dyn NotificationEventRepository>,
    cache: Arc<dyn CacheGateway>,
    publisher: Arc<dyn ChannelPublisher>,
    user_client: Arc<dyn UserServiceClient>,
    template_client: Arc<dyn TemplateServiceClient>,
    enrich_timeout: Duration,
}

impl NotificationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        events: Arc<dyn NotificationEventRepository>,
        cache: Arc<dyn CacheGateway>,
        publisher: Arc<dyn ChannelPublisher>,
        user_client: Arc<dyn UserServiceClient>,
        template_client: Arc<dyn TemplateServiceClient>,
        enrich_timeout: Duration,
    ) -> Self {
        Self {
            notifications,
            events,
            cache,
            publisher,
            user_client,
            template_client,
            enrich_timeout,
        }
    }

    pub fn notifications(&self) -> &Arc<dyn NotificationRepository> {
        &self.notifications
    }

    pub fn events(&self) -> &Arc<dyn NotificationEventRepository> {
        &self.events
    }

    pub fn cache(&self) -> &Arc<dyn CacheGateway> {
        &self.cache
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Idempotency-checked admission: cache fast path, `SET NX` claim, then
    /// the transactional insert (row + `created` event). The datastore's
    /// duplicate detection is authoritative; the cache may false-negative.
    pub async fn admit(
        &self,
        request: NewNotificationRequest,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        if let Some(correlation_id) = self
            .cache
            .get_idempotency_key(&request.idempotency_key)
            .await?
        {
            debug!(
                idempotency_key = %request.idempotency_key,
                correlation_id = %correlation_id,
                "Idempotency cache hit"
            );
            return Ok(AdmissionOutcome::Duplicate { correlation_id });
        }

        let won = self
            .cache
            .put_idempotency_key(&request.idempotency_key, &request.correlation_id)
            .await?;
        if !won {
            // A concurrent request claimed the key between our GET and SET.
            if let Some(correlation_id) = self
                .cache
                .get_idempotency_key(&request.idempotency_key)
                .await?
            {
                return Ok(AdmissionOutcome::Duplicate { correlation_id });
            }
            // Key expired between SET and GET; the datastore decides below.
        }

        let notification = Notification::new(
            request.user_id,
            request.template_code,
            request.channel,
            request.priority,
            request.correlation_id,
            request.idempotency_key,
            request.variables,
            request.metadata,
        );
        let event = created_event(&notification);

        match self.notifications.create(&notification, &event).await {
            Ok(()) => {
                info!(
                    notification_id = %notification.id,
                    correlation_id = %notification.correlation_id,
                    channel = %notification.channel,
                    "Notification admitted"
                );
                Ok(AdmissionOutcome::Accepted(notification))
            }
            Err(herald_store::StoreError::Duplicate { existing, .. }) => {
                debug!(
                    idempotency_key = %existing.idempotency_key,
                    correlation_id = %existing.correlation_id,
                    "Duplicate resolved by datastore constraint"
                );
                // The fast path may hold the losing correlation id; repair it.
                if let Err(e) = self
                    .cache
                    .force_idempotency_key(&existing.idempotency_key, &existing.correlation_id)
                    .await
                {
                    warn!(
                        idempotency_key = %existing.idempotency_key,
                        error = %e,
                        "Failed to repair idempotency cache entry"
                    );
                }
                Ok(AdmissionOutcome::Duplicate {
                    correlation_id: existing.correlation_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Enrichment
    // ========================================================================

    /// Fire-and-forget hand-off to a detached enrichment task. The HTTP
    /// response never waits for this.
    pub fn spawn_enrichment(self: Arc<Self>, notification: Notification) {
        tokio::spawn(async move {
            self.enrich_and_publish(notification).await;
        });
    }

    /// Drive one notification from `pending`/`enriching` to `queued` or
    /// `failed`. Never panics and never returns an error: every failure is
    /// recorded on the row, as an event, and in the status snapshot.
    pub async fn enrich_and_publish(&self, notification: Notification) {
        let deadline = self.enrich_timeout;
        match tokio::time::timeout(deadline, self.enrich_inner(&notification)).await {
            Ok(()) => {}
            Err(_elapsed) => {
                warn!(
                    notification_id = %notification.id,
                    timeout_secs = deadline.as_secs(),
                    "Enrichment deadline exceeded"
                );
                self.record_failure(
                    &notification,
                    ErrorCode::Timeout,
                    "enrichment deadline exceeded",
                    FailureStage::Timeout,
                )
                .await;
            }
        }
    }

    async fn enrich_inner(&self, notification: &Notification) {
        // Claim the row. Fresh admissions arrive as `pending`; rows handed
        // over by the retry loop are already `enriching`.
        match notification.status {
            NotificationStatus::Pending => {
                if let Err(e) = self
                    .notifications
                    .transition(
                        notification.id,
                        NotificationStatus::Pending,
                        NotificationStatus::Enriching,
                    )
                    .await
                {
                    // Lost the claim race to another dispatcher; nothing to do.
                    debug!(
                        notification_id = %notification.id,
                        error = %e,
                        "Skipping enrichment, row not claimable"
                    );
                    return;
                }
            }
            NotificationStatus::Enriching => {}
            other => {
                debug!(
                    notification_id = %notification.id,
                    status = %other,
                    "Skipping enrichment, row not in an enrichable state"
                );
                return;
            }
        }

        // Both fetches run concurrently; the join waits for both sides.
        let (preferences, template) = tokio::join!(
            self.user_client.fetch_user_preferences(&notification.user_id),
            self.template_client
                .fetch_template_by_id(&notification.template_code),
        );

        let preferences = match preferences {
            Ok(p) => p,
            Err(e) => {
                let code = classify_client_error(&e, ErrorCode::UserFetchError);
                self.record_failure(notification, code, &e.to_string(), FailureStage::User)
                    .await;
                return;
            }
        };

        let template = match template {
            Ok(t) => t,
            Err(e) => {
                let code = classify_client_error(&e, ErrorCode::TemplateFetchError);
                self.record_failure(notification, code, &e.to_string(), FailureStage::Template)
                    .await;
                return;
            }
        };

        if let Err((code, message, stage)) =
            validate_enrichment(notification, &preferences, &template)
        {
            self.record_failure(notification, code, &message, stage).await;
            return;
        }

        // Snapshot what was resolved; the broker payload and the stored
        // payload are built from the same parts.
        let payload = json!({
            "user_preferences": preferences,
            "template": template,
            "variables": notification.variables,
        });

        if let Err(e) = self
            .notifications
            .update_enriched_payload(notification.id, &payload)
            .await
        {
            error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to persist enriched payload"
            );
            return;
        }

        self.append_event(notification, EventType::Enriched, json!({}))
            .await;

        let message = EnrichedNotification::from_parts(notification, preferences, template);
        if let Err(e) = self.publisher.publish(&message).await {
            self.record_failure(
                notification,
                ErrorCode::QueueError,
                &e.to_string(),
                FailureStage::Queue,
            )
            .await;
            return;
        }

        if let Err(e) = self
            .notifications
            .transition(
                notification.id,
                NotificationStatus::Enriching,
                NotificationStatus::Queued,
            )
            .await
        {
            error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to record queued status"
            );
            return;
        }

        self.append_event(
            notification,
            EventType::Queued,
            json!({"routing_key": notification.channel.routing_key()}),
        )
        .await;

        self.snapshot_status(&notification.correlation_id, NotificationStatus::Queued, None)
            .await;

        info!(
            notification_id = %notification.id,
            correlation_id = %notification.correlation_id,
            channel = %notification.channel,
            "Notification queued"
        );
    }

    // ========================================================================
    // Failure & bookkeeping
    // ========================================================================

    async fn record_failure(
        &self,
        notification: &Notification,
        code: ErrorCode,
        message: &str,
        stage: FailureStage,
    ) {
        warn!(
            notification_id = %notification.id,
            correlation_id = %notification.correlation_id,
            error_code = %code,
            stage = stage.as_str(),
            error = %message,
            "Enrichment failed"
        );

        if let Err(e) = self
            .notifications
            .update_failure(notification.id, code, message)
            .await
        {
            error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to record failure on row"
            );
        }

        self.append_event(
            notification,
            EventType::Failed,
            json!({
                "stage": stage.as_str(),
                "error_code": code.as_str(),
                "error": message,
            }),
        )
        .await;

        self.snapshot_status(
            &notification.correlation_id,
            NotificationStatus::Failed,
            Some(message.to_string()),
        )
        .await;
    }

    async fn append_event(&self, notification: &Notification, event_type: EventType, data: Value) {
        let event = NotificationEvent::new(notification, event_type, data);
        if let Err(e) = self.events.create_event(&event).await {
            // At-least-once is acceptable for the audit trail; losing one
            // event is logged, never fatal.
            error!(
                notification_id = %notification.id,
                event_type = %event_type,
                error = %e,
                "Failed to append event"
            );
        }
    }

    /// Cache write failures are logged but never change the row's state.
    pub async fn snapshot_status(
        &self,
        correlation_id: &str,
        status: NotificationStatus,
        error: Option<String>,
    ) {
        let snapshot = StatusSnapshot::of(status, error);
        if let Err(e) = self.cache.put_status(correlation_id, &snapshot).await {
            warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Failed to write status snapshot"
            );
        }
    }

    /// Append a `retried` event for a row the recovery loop claimed.
    pub async fn record_retry(&self, notification: &Notification) {
        self.append_event(
            notification,
            EventType::Retried,
            json!({"retry_count": notification.retry_count}),
        )
        .await;
    }
}

/// 4xx/declined/parse classification into the stored error taxonomy.
fn classify_client_error(error: &ClientError, stage_code: ErrorCode) -> ErrorCode {
    match error {
        ClientError::Parse(_) => ErrorCode::ParseError,
        _ => stage_code,
    }
}

/// Template/preference cross-checks performed after both fetches join.
fn validate_enrichment(
    notification: &Notification,
    preferences: &UserPreferences,
    template: &Template,
) -> Result<(), (ErrorCode, String, FailureStage)> {
    if !template.is_active {
        return Err((
            ErrorCode::TemplateFetchError,
            format!("template {} is not active", template.id),
            FailureStage::Template,
        ));
    }
    if !template.supports_channel(notification.channel) {
        return Err((
            ErrorCode::TemplateFetchError,
            format!(
                "template {} has no version for channel {}",
                template.id, notification.channel
            ),
            FailureStage::Template,
        ));
    }
    if template.latest_version().is_none() {
        return Err((
            ErrorCode::TemplateFetchError,
            format!("template {} has no versions", template.id),
            FailureStage::Template,
        ));
    }
    if !preferences.permits(notification.channel) {
        return Err((
            ErrorCode::UserFetchError,
            format!(
                "user {} has opted out of {} notifications",
                notification.user_id, notification.channel
            ),
            FailureStage::User,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_template(channels: &[&str], active: bool) -> Template {
        Template {
            id: "t-1".to_string(),
            name: "welcome".to_string(),
            event: "signup".to_string(),
            channel: channels.iter().map(|c| c.to_string()).collect(),
            language: "en".to_string(),
            is_active: active,
            versions: vec![herald_common::TemplateVersion {
                version: 1,
                subject: Some("Hi".to_string()),
                title: None,
                body: "Hello {{name}}".to_string(),
                variables: json!({}),
            }],
        }
    }

    fn sample_notification(channel: Channel) -> Notification {
        Notification::new(
            "u-1".to_string(),
            "t-1".to_string(),
            channel,
            Priority::Normal,
            "corr-1".to_string(),
            "k1".to_string(),
            json!({}),
            json!({}),
        )
    }

    #[test]
    fn inactive_template_is_a_template_error() {
        let n = sample_notification(Channel::Email);
        let prefs = UserPreferences {
            email_opt_in: true,
            push_opt_in: true,
            daily_limit: 10,
            language: "en".to_string(),
        };
        let (code, _, _) =
            validate_enrichment(&n, &prefs, &sample_template(&["email"], false)).unwrap_err();
        assert_eq!(code, ErrorCode::TemplateFetchError);
    }

    #[test]
    fn channel_mismatch_is_a_template_error() {
        let n = sample_notification(Channel::Push);
        let prefs = UserPreferences {
            email_opt_in: true,
            push_opt_in: true,
            daily_limit: 10,
            language: "en".to_string(),
        };
        let (code, message, _) =
            validate_enrichment(&n, &prefs, &sample_template(&["email"], true)).unwrap_err();
        assert_eq!(code, ErrorCode::TemplateFetchError);
        assert!(message.contains("push"));
    }

    #[test]
    fn opt_out_is_a_user_error() {
        let n = sample_notification(Channel::Email);
        let prefs = UserPreferences {
            email_opt_in: false,
            push_opt_in: true,
            daily_limit: 10,
            language: "en".to_string(),
        };
        let (code, _, _) =
            validate_enrichment(&n, &prefs, &sample_template(&["email"], true)).unwrap_err();
        assert_eq!(code, ErrorCode::UserFetchError);
    }

    #[test]
    fn parse_errors_keep_their_own_code() {
        assert_eq!(
            classify_client_error(
                &ClientError::Parse("bad".to_string()),
                ErrorCode::UserFetchError
            ),
            ErrorCode::ParseError
        );
        assert_eq!(
            classify_client_error(
                &ClientError::Transient("503".to_string()),
                ErrorCode::TemplateFetchError
            ),
            ErrorCode::TemplateFetchError
        );
    }
}
