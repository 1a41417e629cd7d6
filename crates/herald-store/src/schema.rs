//! Schema initialization for the partitioned notification tables.
//!
//! Both tables are range-partitioned by `created_at` with one partition per
//! month; the composite primary key `(id, created_at)` allows partition
//! pruning on id lookups constrained by time. `init_schema` is idempotent
//! and safe to run on every startup; it also creates the partitions for the
//! current and next month so inserts never land without a home.

use chrono::{Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::info;

use crate::Result;

const NOTIFICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id UUID NOT NULL,
    user_id TEXT NOT NULL,
    template_code TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    channel TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority TEXT NOT NULL DEFAULT 'normal',
    variables JSONB NOT NULL DEFAULT '{}'::jsonb,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    enriched_payload JSONB,
    error_code TEXT,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    provider TEXT,
    provider_message_id TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    enriched_at TIMESTAMPTZ,
    queued_at TIMESTAMPTZ,
    sent_at TIMESTAMPTZ,
    delivered_at TIMESTAMPTZ,
    failed_at TIMESTAMPTZ,
    deleted_at TIMESTAMPTZ,
    PRIMARY KEY (id, created_at)
) PARTITION BY RANGE (created_at)
"#;

const EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS notification_events (
    id UUID NOT NULL,
    notification_id UUID NOT NULL,
    correlation_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    channel TEXT NOT NULL,
    event_data JSONB NOT NULL DEFAULT '{}'::jsonb,
    provider TEXT,
    user_agent TEXT,
    ip_address TEXT,
    event_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (id, created_at)
) PARTITION BY RANGE (created_at)
"#;

const NOTIFICATION_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_notifications_correlation
         ON notifications (correlation_id)",
    // Partitioned unique indexes must carry the partition key; the advisory
    // lock taken in NotificationRepository::create is the authoritative
    // 24h-window guard, this index is the backstop.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_idempotency
         ON notifications (idempotency_key, created_at)
         WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_notifications_user_created
         ON notifications (user_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_notifications_status_created
         ON notifications (status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_notifications_failed_retryable
         ON notifications (failed_at)
         WHERE status = 'failed' AND retry_count < max_retries",
];

const EVENT_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_notification_events_notification
         ON notification_events (notification_id, event_at)",
    "CREATE INDEX IF NOT EXISTS idx_notification_events_correlation
         ON notification_events (correlation_id)",
];

/// Create tables, indexes, and the current + next monthly partitions.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(NOTIFICATIONS_TABLE).execute(pool).await?;
    sqlx::query(EVENTS_TABLE).execute(pool).await?;

    for ddl in NOTIFICATION_INDEXES.iter().chain(EVENT_INDEXES) {
        sqlx::query(ddl).execute(pool).await?;
    }

    ensure_partitions(pool).await?;

    info!("Initialized notification schema");
    Ok(())
}

/// Create the monthly partitions covering now and next month (idempotent).
pub async fn ensure_partitions(pool: &PgPool) -> Result<()> {
    let today = Utc::now().date_naive();
    let this_month = month_start(today.year(), today.month());

    for start in [this_month, next_month(this_month)] {
        let end = next_month(start);
        for table in ["notifications", "notification_events"] {
            let partition = format!("{}_y{}m{:02}", table, start.year(), start.month());
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {partition} PARTITION OF {table} \
                 FOR VALUES FROM ('{start}') TO ('{end}')",
            );
            sqlx::query(&ddl).execute(pool).await?;
        }
    }

    Ok(())
}

fn month_start(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start")
}

fn next_month(start: NaiveDate) -> NaiveDate {
    if start.month() == 12 {
        month_start(start.year() + 1, 1)
    } else {
        month_start(start.year(), start.month() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_arithmetic_wraps_year() {
        let dec = month_start(2025, 12);
        assert_eq!(next_month(dec), month_start(2026, 1));
        assert_eq!(next_month(month_start(2026, 1)), month_start(2026, 2));
    }
}
