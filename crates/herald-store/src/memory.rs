//! In-memory repository doubles.
//!
//! Mirror the Postgres semantics closely enough for service-level tests:
//! duplicate admission inside the 24h window, compare-and-swap transitions
//! with first-write phase timestamps, retry claiming, keyset pagination.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use herald_common::{
    ErrorCode, Notification, NotificationEvent, NotificationStatus,
};

use crate::event::NotificationEventRepository;
use crate::notification::{NotificationPage, NotificationRepository};
use crate::{Result, StoreError};

/// In-memory [`NotificationRepository`].
#[derive(Default)]
pub struct InMemoryNotificationRepository {
    rows: Mutex<HashMap<Uuid, Notification>>,
    /// Mirrors the Postgres admission transaction: the `created` event lands
    /// in the linked event repository together with the row.
    events: Option<std::sync::Arc<InMemoryEventRepository>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link an event repository so `create` appends the initial event the
    /// way the transactional Postgres implementation does.
    pub fn with_events(events: std::sync::Arc<InMemoryEventRepository>) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            events: Some(events),
        }
    }

    pub fn insert_raw(&self, notification: Notification) {
        self.rows.lock().insert(notification.id, notification);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Notification> {
        self.rows.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    fn stamp_phase(notification: &mut Notification, status: NotificationStatus) {
        let now = Utc::now();
        let slot = match status {
            NotificationStatus::Queued => &mut notification.queued_at,
            NotificationStatus::Sent => &mut notification.sent_at,
            NotificationStatus::Delivered => &mut notification.delivered_at,
            NotificationStatus::Failed => &mut notification.failed_at,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(now);
        }
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn create(
        &self,
        notification: &Notification,
        created_event: &NotificationEvent,
    ) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let mut rows = self.rows.lock();

        if let Some(existing) = rows.values().find(|n| {
            n.idempotency_key == notification.idempotency_key
                && n.deleted_at.is_none()
                && n.created_at > cutoff
        }) {
            return Err(StoreError::Duplicate {
                key: notification.idempotency_key.clone(),
                existing: Box::new(existing.clone()),
            });
        }

        rows.insert(notification.id, notification.clone());
        if let Some(events) = &self.events {
            events.events.lock().push(created_event.clone());
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self
            .rows
            .lock()
            .get(&id)
            .filter(|n| n.deleted_at.is_none())
            .cloned())
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Notification>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|n| n.correlation_id == correlation_id && n.deleted_at.is_none())
            .cloned())
    }

    async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Notification>> {
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|n| {
                n.idempotency_key == key && n.deleted_at.is_none() && n.created_at > cutoff
            })
            .max_by_key(|n| n.created_at)
            .cloned())
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

        let mut rows = self.rows.lock();
        let notification = rows
            .get_mut(&id)
            .filter(|n| n.deleted_at.is_none() && n.status == from)
            .ok_or(StoreError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        notification.status = to;
        notification.updated_at = Utc::now();
        Self::stamp_phase(notification, to);
        Ok(())
    }

    async fn update_enriched_payload(&self, id: Uuid, payload: &serde_json::Value) -> Result<()> {
        let mut rows = self.rows.lock();
        let notification = rows
            .get_mut(&id)
            .filter(|n| n.deleted_at.is_none())
            .ok_or(StoreError::NotFound(id))?;

        notification.enriched_payload = Some(payload.clone());
        if notification.enriched_at.is_none() {
            notification.enriched_at = Some(Utc::now());
        }
        notification.updated_at = Utc::now();
        Ok(())
    }

    async fn update_failure(&self, id: Uuid, code: ErrorCode, message: &str) -> Result<()> {
        let mut rows = self.rows.lock();
        let notification = rows
            .get_mut(&id)
            .filter(|n| n.deleted_at.is_none())
            .ok_or(StoreError::NotFound(id))?;

        notification.status = NotificationStatus::Failed;
        notification.error_code = Some(code);
        notification.error_message = Some(message.to_string());
        notification.retry_count += 1;
        if notification.failed_at.is_none() {
            notification.failed_at = Some(Utc::now());
        }
        notification.updated_at = Utc::now();
        Ok(())
    }

    async fn update_provider(
        &self,
        id: Uuid,
        provider: Option<&str>,
        provider_message_id: Option<&str>,
    ) -> Result<()> {
        let mut rows = self.rows.lock();
        let notification = rows
            .get_mut(&id)
            .filter(|n| n.deleted_at.is_none())
            .ok_or(StoreError::NotFound(id))?;

        if let Some(p) = provider {
            notification.provider = Some(p.to_string());
        }
        if let Some(pmid) = provider_message_id {
            notification.provider_message_id = Some(pmid.to_string());
        }
        notification.updated_at = Utc::now();
        Ok(())
    }

    async fn get_failed_for_retry(&self, limit: u32) -> Result<Vec<Notification>> {
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let mut rows = self.rows.lock();

        let mut candidates: Vec<Uuid> = rows
            .values()
            .filter(|n| {
                n.status == NotificationStatus::Failed
                    && n.retry_count < n.max_retries
                    && n.failed_at.map(|t| t > cutoff).unwrap_or(false)
                    && n.deleted_at.is_none()
            })
            .map(|n| n.id)
            .collect();

        candidates.sort_by(|a, b| {
            let (na, nb) = (&rows[a], &rows[b]);
            nb.priority
                .cmp(&na.priority)
                .then(na.created_at.cmp(&nb.created_at))
        });
        candidates.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let notification = rows.get_mut(&id).expect("candidate id present");
            notification.status = NotificationStatus::Enriching;
            notification.error_code = None;
            notification.error_message = None;
            notification.updated_at = Utc::now();
            claimed.push(notification.clone());
        }
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

        let mut stale: Vec<Notification> = self
            .rows
            .lock()
            .values()
            .filter(|n| {
                n.status == NotificationStatus::Pending
                    && n.updated_at < cutoff
                    && n.deleted_at.is_none()
            })
            .cloned()
            .collect();

        stale.sort_by_key(|n| n.created_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn get_user_notifications(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<NotificationPage> {
        let mut items: Vec<Notification> = self
            .rows
            .lock()
            .values()
            .filter(|n| {
                n.user_id == user_id
                    && n.deleted_at.is_none()
                    && cursor.map(|c| n.created_at < c).unwrap_or(true)
            })
            .cloned()
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit as usize);

        let next_cursor = if items.len() == limit as usize {
            items.last().map(|n| n.created_at)
        } else {
            None
        };

        Ok(NotificationPage { items, next_cursor })
    }

    async fn count_user_notifications(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|n| n.user_id == user_id && n.deleted_at.is_none())
            .count() as u64)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock();
        let notification = rows
            .get_mut(&id)
            .filter(|n| n.deleted_at.is_none())
            .ok_or(StoreError::NotFound(id))?;

        notification.deleted_at = Some(Utc::now());
        notification.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory [`NotificationEventRepository`].
#[derive(Default)]
pub struct InMemoryEventRepository {
    events: Mutex<Vec<NotificationEvent>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event types recorded for a notification, in append order.
    pub fn event_types(&self, notification_id: Uuid) -> Vec<herald_common::EventType> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.notification_id == notification_id)
            .map(|e| e.event_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl NotificationEventRepository for InMemoryEventRepository {
    async fn create_event(&self, event: &NotificationEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn get_by_notification(&self, notification_id: Uuid) -> Result<Vec<NotificationEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.notification_id == notification_id)
            .cloned()
            .collect())
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<NotificationEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }
}
