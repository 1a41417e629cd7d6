//! Append-only audit log for notification lifecycle events.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use herald_common::{Channel, EventType, NotificationEvent};

use crate::{Result, StoreError};

const EVENT_COLUMNS: &str = "id, notification_id, correlation_id, event_type, channel, \
     event_data, provider, user_agent, ip_address, event_at, created_at";

#[async_trait]
pub trait NotificationEventRepository: Send + Sync {
    /// Append one immutable event.
    async fn create_event(&self, event: &NotificationEvent) -> Result<()>;

    /// All events for a notification, oldest first.
    async fn get_by_notification(&self, notification_id: Uuid) -> Result<Vec<NotificationEvent>>;

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<NotificationEvent>>;
}

/// PostgreSQL implementation of [`NotificationEventRepository`].
pub struct PgNotificationEventRepository {
    pool: PgPool,
}

impl PgNotificationEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Insert inside an open transaction; used by the admission path so the row
/// and its `created` event commit together.
pub(crate) async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NotificationEvent,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO notification_events (id, notification_id, correlation_id, event_type, \
         channel, event_data, provider, user_agent, ip_address, event_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(event.id)
    .bind(event.notification_id)
    .bind(&event.correlation_id)
    .bind(event.event_type.as_str())
    .bind(event.channel.as_str())
    .bind(&event.event_data)
    .bind(&event.provider)
    .bind(&event.user_agent)
    .bind(&event.ip_address)
    .bind(event.event_at)
    .bind(event.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn parse_event(row: &PgRow) -> Result<NotificationEvent> {
    let event_type: String = row.try_get("event_type")?;
    let channel: String = row.try_get("channel")?;

    Ok(NotificationEvent {
        id: row.try_get("id")?,
        notification_id: row.try_get("notification_id")?,
        correlation_id: row.try_get("correlation_id")?,
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| StoreError::Decode(format!("event_type: {event_type}")))?,
        channel: Channel::parse(&channel)
            .ok_or_else(|| StoreError::Decode(format!("channel: {channel}")))?,
        event_data: row.try_get("event_data")?,
        provider: row.try_get("provider")?,
        user_agent: row.try_get("user_agent")?,
        ip_address: row.try_get("ip_address")?,
        event_at: row.try_get("event_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl NotificationEventRepository for PgNotificationEventRepository {
    async fn create_event(&self, event: &NotificationEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_events (id, notification_id, correlation_id, event_type, \
             channel, event_data, provider, user_agent, ip_address, event_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(event.id)
        .bind(event.notification_id)
        .bind(&event.correlation_id)
        .bind(event.event_type.as_str())
        .bind(event.channel.as_str())
        .bind(&event.event_data)
        .bind(&event.provider)
        .bind(&event.user_agent)
        .bind(&event.ip_address)
        .bind(event.event_at)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_notification(&self, notification_id: Uuid) -> Result<Vec<NotificationEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM notification_events \
             WHERE notification_id = $1 ORDER BY event_at ASC"
        ))
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_event).collect()
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<NotificationEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM notification_events \
             WHERE correlation_id = $1 ORDER BY event_at ASC"
        ))
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_event).collect()
    }
}
