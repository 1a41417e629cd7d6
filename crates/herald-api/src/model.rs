//! Request/response DTOs for the HTTP boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use herald_common::{Channel, Notification, NotificationStatus, Priority};

use crate::error::ApiError;

/// `POST /notification` body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateNotificationRequest {
    /// Delivery channel: `email` or `push`
    pub notification_type: String,
    pub user_id: String,
    pub template_code: String,
    /// Template substitution data
    pub variables: Value,
    /// Caller's own request identifier, kept in metadata
    pub request_id: String,
    /// Priority code: 0 = low, 1 = normal, 2 = high, 3 = urgent
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl CreateNotificationRequest {
    /// Field-level validation; returns the parsed channel.
    pub fn validate(&self) -> Result<Channel, ApiError> {
        if self.notification_type.trim().is_empty() {
            return Err(ApiError::validation("notification_type is required"));
        }
        let channel = Channel::parse(&self.notification_type).ok_or_else(|| {
            ApiError::validation(format!("unknown channel: {}", self.notification_type))
        })?;

        if self.user_id.trim().is_empty() {
            return Err(ApiError::validation("user_id is required"));
        }
        if self.template_code.trim().is_empty() {
            return Err(ApiError::validation("template_code is required"));
        }
        if self.request_id.trim().is_empty() {
            return Err(ApiError::validation("request_id is required"));
        }
        if self.variables.is_null() {
            return Err(ApiError::validation("variables is required"));
        }

        Ok(channel)
    }

    pub fn priority(&self) -> Priority {
        self.priority.map(Priority::from_code).unwrap_or_default()
    }
}

/// `202`/`200` payload for an (possibly duplicate) accepted request.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationAccepted {
    pub correlation_id: String,
    pub idempotency_key: String,
    pub status: String,
}

/// Worker status-callback body.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusCallbackRequest {
    /// Target status: `processing`, `sent`, `delivered`, `failed`, `cancelled`
    pub status: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// Asynchronous status as seen by a polling client.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusView {
    pub correlation_id: String,
    pub status: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Query parameters for the user-scoped listing.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListNotificationsQuery {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
    /// Keyset cursor: the `created_at` of the last row of the previous page
    #[serde(default)]
    pub cursor: Option<DateTime<Utc>>,
}

impl ListNotificationsQuery {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }
}

/// One page of notifications plus the cursor for the next one.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationPageData {
    pub items: Vec<Notification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_body() -> CreateNotificationRequest {
        serde_json::from_value(json!({
            "notification_type": "email",
            "user_id": "u-1",
            "template_code": "t-1",
            "variables": {"name": "A"},
            "request_id": "r1",
            "priority": 2
        }))
        .unwrap()
    }

    #[test]
    fn valid_request_parses_channel_and_priority() {
        let body = valid_body();
        assert_eq!(body.validate().unwrap(), Channel::Email);
        assert_eq!(body.priority(), Priority::High);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let mut body = valid_body();
        body.notification_type = "sms".to_string();
        assert!(body.validate().is_err());
    }

    #[test]
    fn empty_fields_are_rejected() {
        let mut body = valid_body();
        body.user_id = "  ".to_string();
        assert!(body.validate().is_err());
    }

    #[test]
    fn missing_priority_defaults_to_normal() {
        let body: CreateNotificationRequest = serde_json::from_value(json!({
            "notification_type": "push",
            "user_id": "u-1",
            "template_code": "t-1",
            "variables": {},
            "request_id": "r1"
        }))
        .unwrap();
        assert_eq!(body.priority(), Priority::Normal);
    }

    #[test]
    fn list_limit_is_clamped() {
        let query = ListNotificationsQuery {
            user_id: "u-1".to_string(),
            limit: Some(10_000),
            cursor: None,
        };
        assert_eq!(query.limit(), 100);
    }
}
