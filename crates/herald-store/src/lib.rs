//! Herald Datastore Gateway
//!
//! Pooled PostgreSQL access for the notification platform:
//! - monthly range-partitioned `notifications` / `notification_events` tables
//! - typed repositories with state-transition compare-and-swap updates
//! - idempotency-aware insertion (advisory lock + window check, authoritative)
//! - retry selection with `FOR UPDATE SKIP LOCKED`
//! - keyset pagination over a user's notifications

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use herald_config::DatabaseConfig;

mod event;
mod notification;
pub mod memory;
mod schema;

pub use event::{NotificationEventRepository, PgNotificationEventRepository};
pub use notification::{
    created_event, NotificationPage, NotificationRepository, PgNotificationRepository,
};
pub use schema::{ensure_partitions, init_schema};

/// Datastore error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Duplicate idempotency key: {key}")]
    Duplicate {
        key: String,
        existing: Box<herald_common::Notification>,
    },

    #[error("Notification not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Corrupt row: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Build the connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.max_idle_conns)
        .max_lifetime(config.conn_max_lifetime())
        .idle_timeout(config.conn_max_idle_time())
        .connect(&config.url())
        .await?;

    info!(
        host = %config.host,
        database = %config.name,
        max_connections = config.max_open_conns,
        "Connected to PostgreSQL"
    );

    Ok(pool)
}

/// Verify connectivity with a trivial round-trip.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
