use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

pub mod logging;

// ============================================================================
// Delivery Channels
// ============================================================================

/// Delivery medium for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    /// All channels the platform can fan out to.
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    /// Broker routing key for this channel (`notification.<channel>`).
    pub fn routing_key(&self) -> String {
        format!("notification.{}", self.as_str())
    }

    /// Durable queue bound to this channel's routing key.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Channel::Email => "email_queue",
            Channel::Push => "push_queue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Channel::Email),
            "push" => Some(Channel::Push),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::parse(s).ok_or_else(|| format!("unknown channel: {}", s))
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Delivery priority. Stored as text, accepted from callers as an integer
/// code (0 = low .. 3 = urgent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn code(&self) -> i32 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }

    /// Create from integer code, defaulting to Normal for unknown codes.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Priority::Low,
            2 => Priority::High,
            3 => Priority::Urgent,
            _ => Priority::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Notification Status & State Machine
// ============================================================================

/// Lifecycle status of a notification.
///
/// Transitions are validated through [`NotificationStatus::can_transition_to`];
/// anything outside that table is rejected at the repository boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Enriching,
    Queued,
    Processing,
    Sent,
    Delivered,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Enriching => "enriching",
            NotificationStatus::Queued => "queued",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "enriching" => Some(NotificationStatus::Enriching),
            "queued" => Some(NotificationStatus::Queued),
            "processing" => Some(NotificationStatus::Processing),
            "sent" => Some(NotificationStatus::Sent),
            "delivered" => Some(NotificationStatus::Delivered),
            "failed" => Some(NotificationStatus::Failed),
            "cancelled" => Some(NotificationStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again (except `failed`, which an
    /// explicit retry may move back to `enriching`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered
                | NotificationStatus::Failed
                | NotificationStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge of the status state machine.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;

        // Any non-terminal state may be cancelled.
        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (*self, next),
            (Pending, Enriching)
                | (Pending, Failed)
                | (Enriching, Queued)
                | (Enriching, Failed)
                | (Queued, Processing)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Sent, Delivered)
                | (Sent, Failed)
                | (Failed, Enriching)
        )
    }

    /// Column holding this status' phase timestamp, if it has one.
    pub fn phase_timestamp_column(&self) -> Option<&'static str> {
        match self {
            NotificationStatus::Queued => Some("queued_at"),
            NotificationStatus::Sent => Some("sent_at"),
            NotificationStatus::Delivered => Some("delivered_at"),
            NotificationStatus::Failed => Some("failed_at"),
            _ => None,
        }
    }

    /// The audit event appended when a notification enters this status.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            NotificationStatus::Queued => Some(EventType::Queued),
            NotificationStatus::Processing => None, // workers append `sent`/`failed` later
            NotificationStatus::Sent => Some(EventType::Sent),
            NotificationStatus::Delivered => Some(EventType::Delivered),
            NotificationStatus::Failed => Some(EventType::Failed),
            NotificationStatus::Cancelled => Some(EventType::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Terminal failure classification stored in `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UserFetchError,
    TemplateFetchError,
    ParseError,
    QueueError,
    Timeout,
    /// Surfaced only in HTTP responses, never stored on a row.
    ValidationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UserFetchError => "USER_FETCH_ERROR",
            ErrorCode::TemplateFetchError => "TEMPLATE_FETCH_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::QueueError => "QUEUE_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER_FETCH_ERROR" => Some(ErrorCode::UserFetchError),
            "TEMPLATE_FETCH_ERROR" => Some(ErrorCode::TemplateFetchError),
            "PARSE_ERROR" => Some(ErrorCode::ParseError),
            "QUEUE_ERROR" => Some(ErrorCode::QueueError),
            "TIMEOUT" => Some(ErrorCode::Timeout),
            "VALIDATION_ERROR" => Some(ErrorCode::ValidationError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Notification (root record)
// ============================================================================

/// The root record; one per accepted, non-duplicate request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub template_code: String,
    /// Propagated inbound if supplied, else generated. Unique per row.
    pub correlation_id: String,
    /// Caller-supplied; unique among non-deleted rows within 24 hours.
    pub idempotency_key: String,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub priority: Priority,
    /// Template substitution data, opaque to the orchestrator.
    pub variables: Value,
    /// Opaque caller metadata.
    pub metadata: Value,
    /// Snapshot of resolved preferences + template + variables, captured at
    /// enrichment time.
    pub enriched_payload: Option<Value>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub provider: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub const DEFAULT_MAX_RETRIES: i32 = 3;

impl Notification {
    /// Build a fresh `pending` notification for an admitted request.
    pub fn new(
        user_id: String,
        template_code: String,
        channel: Channel,
        priority: Priority,
        correlation_id: String,
        idempotency_key: String,
        variables: Value,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            template_code,
            correlation_id,
            idempotency_key,
            channel,
            status: NotificationStatus::Pending,
            priority,
            variables,
            metadata,
            enriched_payload: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            provider: None,
            provider_message_id: None,
            created_at: now,
            updated_at: now,
            enriched_at: None,
            queued_at: None,
            sent_at: None,
            delivered_at: None,
            failed_at: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ============================================================================
// Notification Events (append-only audit log)
// ============================================================================

/// Audit event type; one event is appended per status transition, plus
/// engagement events reported by providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Enriched,
    Queued,
    Sent,
    Delivered,
    Failed,
    Opened,
    Clicked,
    Bounced,
    Unsubscribed,
    Cancelled,
    Retried,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Enriched => "enriched",
            EventType::Queued => "queued",
            EventType::Sent => "sent",
            EventType::Delivered => "delivered",
            EventType::Failed => "failed",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Bounced => "bounced",
            EventType::Unsubscribed => "unsubscribed",
            EventType::Cancelled => "cancelled",
            EventType::Retried => "retried",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(EventType::Created),
            "enriched" => Some(EventType::Enriched),
            "queued" => Some(EventType::Queued),
            "sent" => Some(EventType::Sent),
            "delivered" => Some(EventType::Delivered),
            "failed" => Some(EventType::Failed),
            "opened" => Some(EventType::Opened),
            "clicked" => Some(EventType::Clicked),
            "bounced" => Some(EventType::Bounced),
            "unsubscribed" => Some(EventType::Unsubscribed),
            "cancelled" => Some(EventType::Cancelled),
            "retried" => Some(EventType::Retried),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record. Events reference their notification by id;
/// loaders join on demand.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub correlation_id: String,
    pub event_type: EventType,
    pub channel: Channel,
    pub event_data: Value,
    pub provider: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub event_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(notification: &Notification, event_type: EventType, event_data: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            notification_id: notification.id,
            correlation_id: notification.correlation_id.clone(),
            event_type,
            channel: notification.channel,
            event_data,
            provider: None,
            user_agent: None,
            ip_address: None,
            event_at: now,
            created_at: now,
        }
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }
}

// ============================================================================
// Remote Service Documents
// ============================================================================

/// Per-user delivery preferences, fetched from the user service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPreferences {
    pub email_opt_in: bool,
    pub push_opt_in: bool,
    pub daily_limit: i64,
    pub language: String,
}

impl UserPreferences {
    /// Whether these preferences permit delivery on `channel`.
    pub fn permits(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_opt_in,
            Channel::Push => self.push_opt_in,
        }
    }
}

/// A single version of a message template.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplateVersion {
    pub version: i32,
    pub subject: Option<String>,
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub variables: Value,
}

/// Message template fetched from the template service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub event: String,
    /// Channels this template advertises (e.g. `["email", "push"]`).
    pub channel: Vec<String>,
    pub language: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    pub versions: Vec<TemplateVersion>,
}

impl Template {
    pub fn supports_channel(&self, channel: Channel) -> bool {
        self.channel.iter().any(|c| c == channel.as_str())
    }

    /// The highest-numbered version, used for rendering.
    pub fn latest_version(&self) -> Option<&TemplateVersion> {
        self.versions.iter().max_by_key(|v| v.version)
    }
}

// ============================================================================
// Broker Wire Document
// ============================================================================

/// The per-channel message handed to channel workers. Crafted to be
/// idempotent on `notification_id` so at-least-once broker delivery never
/// produces a second user-visible send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedNotification {
    pub notification_id: Uuid,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub user_id: String,
    pub template_code: String,
    pub channel: Channel,
    pub priority: Priority,
    pub user_preferences: UserPreferences,
    pub template: Template,
    pub variables: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl EnrichedNotification {
    pub fn from_parts(
        notification: &Notification,
        preferences: UserPreferences,
        template: Template,
    ) -> Self {
        Self {
            notification_id: notification.id,
            correlation_id: notification.correlation_id.clone(),
            idempotency_key: notification.idempotency_key.clone(),
            user_id: notification.user_id.clone(),
            template_code: notification.template_code.clone(),
            channel: notification.channel,
            priority: notification.priority,
            user_preferences: preferences,
            template,
            variables: notification.variables.clone(),
            metadata: notification.metadata.clone(),
            created_at: notification.created_at,
        }
    }
}

/// Asynchronous status snapshot cached under
/// `notification:status:{correlation_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusSnapshot {
    pub status: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn of(status: NotificationStatus, error: Option<String>) -> Self {
        Self {
            status,
            error,
            updated_at: Utc::now(),
        }
    }
}
