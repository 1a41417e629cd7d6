//! Notification repository: typed CRUD and state transitions.
//!
//! Status changes go through [`NotificationRepository::transition`], a
//! compare-and-swap on the current status that also stamps the phase
//! timestamp with `COALESCE(col, NOW())` so a replayed transition can never
//! move a timestamp. Idempotency admission is authoritative here: `create`
//! serializes same-key inserts with a transaction-scoped advisory lock and
//! resolves collisions to the existing row.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use herald_common::{
    Channel, ErrorCode, EventType, Notification, NotificationEvent, NotificationStatus, Priority,
};

use crate::event::insert_event;
use crate::{Result, StoreError};

/// Idempotency keys collide only within this window.
const IDEMPOTENCY_WINDOW_HOURS: i64 = 24;

const NOTIFICATION_COLUMNS: &str = "id, user_id, template_code, correlation_id, idempotency_key, \
     channel, status, priority, variables, metadata, enriched_payload, \
     error_code, error_message, retry_count, max_retries, provider, provider_message_id, \
     created_at, updated_at, enriched_at, queued_at, sent_at, delivered_at, failed_at, deleted_at";

/// One page of a user's notifications under keyset pagination.
#[derive(Debug)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    /// `created_at` of the last row; feed back as the next request's cursor.
    pub next_cursor: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert a fresh `pending` notification together with its `created`
    /// event in one transaction.
    ///
    /// Returns [`StoreError::Duplicate`] carrying the existing row when the
    /// idempotency key already has a non-deleted row in the 24h window.
    async fn create(
        &self,
        notification: &Notification,
        created_event: &NotificationEvent,
    ) -> Result<()>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Notification>>;

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Notification>>;

    /// Lookup by idempotency key within the 24h window. Absent keys are
    /// `None`, not an error.
    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Notification>>;

    /// Compare-and-swap status transition. Stamps the phase timestamp for
    /// `to` (first write wins) and refuses soft-deleted rows and rows whose
    /// current status is not `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<()>;

    /// Persist the enrichment snapshot; sets `enriched_at` once.
    async fn update_enriched_payload(&self, id: Uuid, payload: &serde_json::Value) -> Result<()>;

    /// Terminal failure for this attempt: `status = 'failed'`, error fields,
    /// `retry_count + 1`, `failed_at` first-write.
    async fn update_failure(&self, id: Uuid, code: ErrorCode, message: &str) -> Result<()>;

    /// Provider hand-off details reported by a channel worker.
    async fn update_provider(
        &self,
        id: Uuid,
        provider: Option<&str>,
        provider_message_id: Option<&str>,
    ) -> Result<()>;

    /// Claim up to `limit` retryable failures with `FOR UPDATE SKIP LOCKED`
    /// (priority desc, then oldest first; `retry_count < max_retries`;
    /// failed inside the last 24h). Claimed rows are moved back to
    /// `enriching` in the same transaction so concurrent retry workers never
    /// pick the same row.
    async fn get_failed_for_retry(&self, limit: u32) -> Result<Vec<Notification>>;

    /// Pending rows untouched for longer than `older_than` — orphans of a
    /// crashed dispatcher. Re-dispatch is race-safe because enrichment
    /// starts with a `pending -> enriching` compare-and-swap.
    async fn get_stale_pending(&self, older_than: Duration, limit: u32)
        -> Result<Vec<Notification>>;

    /// Keyset pagination over a user's notifications, newest first.
    async fn get_user_notifications(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<NotificationPage>;

    async fn count_user_notifications(&self, user_id: &str) -> Result<u64>;

    async fn soft_delete(&self, id: Uuid) -> Result<()>;
}

/// PostgreSQL implementation of [`NotificationRepository`].
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn parse_notification(row: &PgRow) -> Result<Notification> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let error_code: Option<String> = row.try_get("error_code")?;

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        template_code: row.try_get("template_code")?,
        correlation_id: row.try_get("correlation_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        channel: Channel::parse(&channel)
            .ok_or_else(|| StoreError::Decode(format!("channel: {channel}")))?,
        status: NotificationStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("status: {status}")))?,
        priority: Priority::parse(&priority)
            .ok_or_else(|| StoreError::Decode(format!("priority: {priority}")))?,
        variables: row.try_get("variables")?,
        metadata: row.try_get("metadata")?,
        enriched_payload: row.try_get("enriched_payload")?,
        error_code: error_code
            .map(|c| ErrorCode::parse(&c).ok_or_else(|| StoreError::Decode(format!("error_code: {c}"))))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        provider: row.try_get("provider")?,
        provider_message_id: row.try_get("provider_message_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        enriched_at: row.try_get("enriched_at")?,
        queued_at: row.try_get("queued_at")?,
        sent_at: row.try_get("sent_at")?,
        delivered_at: row.try_get("delivered_at")?,
        failed_at: row.try_get("failed_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(
        &self,
        notification: &Notification,
        created_event: &NotificationEvent,
    ) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::hours(IDEMPOTENCY_WINDOW_HOURS);
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent same-key inserts; released at commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&notification.idempotency_key)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE idempotency_key = $1 AND deleted_at IS NULL AND created_at > $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(&notification.idempotency_key)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let existing = parse_notification(&row)?;
            tx.rollback().await?;
            return Err(StoreError::Duplicate {
                key: notification.idempotency_key.clone(),
                existing: Box::new(existing),
            });
        }

        sqlx::query(
            "INSERT INTO notifications (id, user_id, template_code, correlation_id, \
             idempotency_key, channel, status, priority, variables, metadata, \
             retry_count, max_retries, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(notification.id)
        .bind(&notification.user_id)
        .bind(&notification.template_code)
        .bind(&notification.correlation_id)
        .bind(&notification.idempotency_key)
        .bind(notification.channel.as_str())
        .bind(notification.status.as_str())
        .bind(notification.priority.as_str())
        .bind(&notification.variables)
        .bind(&notification.metadata)
        .bind(notification.retry_count)
        .bind(notification.max_retries)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_event(&mut tx, created_event).await?;

        tx.commit().await?;

        debug!(
            notification_id = %notification.id,
            correlation_id = %notification.correlation_id,
            "Inserted notification with created event"
        );

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_notification).transpose()
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE correlation_id = $1 AND deleted_at IS NULL"
        ))
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_notification).transpose()
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Notification>> {
        let cutoff = Utc::now() - ChronoDuration::hours(IDEMPOTENCY_WINDOW_HOURS);
        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE idempotency_key = $1 AND deleted_at IS NULL AND created_at > $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(key)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_notification).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let phase_clause = match to.phase_timestamp_column() {
            Some(col) => format!(", {col} = COALESCE({col}, NOW())"),
            None => String::new(),
        };

        let result = sqlx::query(&format!(
            "UPDATE notifications SET status = $1, updated_at = NOW(){phase_clause} \
             WHERE id = $2 AND status = $3 AND deleted_at IS NULL"
        ))
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Row gone, deleted, or someone else transitioned first.
            return Err(StoreError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        debug!(notification_id = %id, from = %from, to = %to, "Status transition");
        Ok(())
    }

    async fn update_enriched_payload(&self, id: Uuid, payload: &serde_json::Value) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET enriched_payload = $1, \
             enriched_at = COALESCE(enriched_at, NOW()), updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(payload)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn update_failure(&self, id: Uuid, code: ErrorCode, message: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET status = 'failed', error_code = $1, error_message = $2, \
             retry_count = retry_count + 1, failed_at = COALESCE(failed_at, NOW()), \
             updated_at = NOW() \
             WHERE id = $3 AND deleted_at IS NULL",
        )
        .bind(code.as_str())
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn update_provider(
        &self,
        id: Uuid,
        provider: Option<&str>,
        provider_message_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET provider = COALESCE($1, provider), \
             provider_message_id = COALESCE($2, provider_message_id), updated_at = NOW() \
             WHERE id = $3 AND deleted_at IS NULL",
        )
        .bind(provider)
        .bind(provider_message_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn get_failed_for_retry(&self, limit: u32) -> Result<Vec<Notification>> {
        let cutoff = Utc::now() - ChronoDuration::hours(IDEMPOTENCY_WINDOW_HOURS);
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE status = 'failed' AND retry_count < max_retries \
               AND failed_at > $1 AND deleted_at IS NULL \
             ORDER BY CASE priority \
                 WHEN 'urgent' THEN 3 WHEN 'high' THEN 2 WHEN 'normal' THEN 1 ELSE 0 END DESC, \
                 created_at ASC \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            claimed.push(parse_notification(row)?);
        }

        if !claimed.is_empty() {
            let ids: Vec<Uuid> = claimed.iter().map(|n| n.id).collect();
            sqlx::query(
                "UPDATE notifications SET status = 'enriching', error_code = NULL, \
                 error_message = NULL, updated_at = NOW() WHERE id = ANY($1)",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

            for notification in &mut claimed {
                notification.status = NotificationStatus::Enriching;
                notification.error_code = None;
                notification.error_message = None;
            }
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn get_stale_pending(
        &self,
        older_than: Duration,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(older_than)
                .unwrap_or_else(|_| ChronoDuration::seconds(120));

        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE status = 'pending' AND updated_at < $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_notification).collect()
    }

    async fn get_user_notifications(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<NotificationPage> {
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE user_id = $1 AND deleted_at IS NULL \
               AND ($2::timestamptz IS NULL OR created_at < $2) \
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(user_id)
        .bind(cursor)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let items: Vec<Notification> = rows
            .iter()
            .map(parse_notification)
            .collect::<Result<_>>()?;

        let next_cursor = if items.len() == limit as usize {
            items.last().map(|n| n.created_at)
        } else {
            None
        };

        Ok(NotificationPage { items, next_cursor })
    }

    async fn count_user_notifications(&self, user_id: &str) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM notifications \
             WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        Ok(total as u64)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE notifications SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

/// Build the `created` audit event for a freshly admitted notification.
pub fn created_event(notification: &Notification) -> NotificationEvent {
    NotificationEvent::new(
        notification,
        EventType::Created,
        serde_json::json!({
            "priority": notification.priority.as_str(),
            "template_code": notification.template_code,
        }),
    )
}
