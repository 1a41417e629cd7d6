//! Herald Cache Gateway
//!
//! Redis-backed key/value store for two key families:
//! - `idempotency:{key}` -> correlation id, written with set-if-absent
//!   semantics and a 24h TTL (the fast-path duplicate check)
//! - `notification:status:{correlation_id}` -> status snapshot JSON,
//!   overwritten on every transition, 24h TTL
//!
//! The gateway is cloneable; `redis::aio::ConnectionManager` multiplexes and
//! reconnects underneath.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use herald_common::StatusSnapshot;
use herald_config::RedisConfig;

mod memory;

pub use memory::InMemoryCacheGateway;

/// Both key families expire after 24 hours.
pub const CACHE_TTL_SECONDS: u64 = 86_400;

/// Cache error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Key/value operations the orchestrator needs from the cache.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    /// `SET idempotency:{key} <correlation_id> NX EX 86400`.
    /// Returns `true` when this caller won the key, `false` when a
    /// concurrent request holds it already.
    async fn put_idempotency_key(&self, key: &str, correlation_id: &str) -> Result<bool>;

    /// Correlation id recorded for `key`, if any.
    async fn get_idempotency_key(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional `SET ... EX 86400`; used to repair the fast path after
    /// the datastore resolved a duplicate the cache had forgotten.
    async fn force_idempotency_key(&self, key: &str, correlation_id: &str) -> Result<()>;

    /// Overwrite the status snapshot for a correlation id.
    async fn put_status(&self, correlation_id: &str, snapshot: &StatusSnapshot) -> Result<()>;

    async fn get_status(&self, correlation_id: &str) -> Result<Option<StatusSnapshot>>;

    /// Round-trip health probe.
    async fn ping(&self) -> Result<()>;
}

fn idempotency_cache_key(key: &str) -> String {
    format!("idempotency:{key}")
}

fn status_cache_key(correlation_id: &str) -> String {
    format!("notification:status:{correlation_id}")
}

/// Redis implementation of [`CacheGateway`].
#[derive(Clone)]
pub struct RedisCacheGateway {
    conn: ConnectionManager,
}

impl RedisCacheGateway {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url().as_str())
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;

        info!(address = %config.address, db = config.db, "Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheGateway for RedisCacheGateway {
    async fn put_idempotency_key(&self, key: &str, correlation_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();

        // SET key value NX EX seconds
        let result: Option<String> = redis::cmd("SET")
            .arg(idempotency_cache_key(key))
            .arg(correlation_id)
            .arg("NX")
            .arg("EX")
            .arg(CACHE_TTL_SECONDS)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn get_idempotency_key(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(idempotency_cache_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn force_idempotency_key(&self, key: &str, correlation_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(idempotency_cache_key(key))
            .arg(correlation_id)
            .arg("EX")
            .arg(CACHE_TTL_SECONDS)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn put_status(&self, correlation_id: &str, snapshot: &StatusSnapshot) -> Result<()> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(snapshot)?;

        redis::cmd("SET")
            .arg(status_cache_key(correlation_id))
            .arg(&body)
            .arg("EX")
            .arg(CACHE_TTL_SECONDS)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(correlation_id = %correlation_id, status = %snapshot.status, "Cached status snapshot");
        Ok(())
    }

    async fn get_status(&self, correlation_id: &str) -> Result<Option<StatusSnapshot>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(status_cache_key(correlation_id))
            .query_async(&mut conn)
            .await?;

        value
            .map(|v| serde_json::from_str(&v).map_err(CacheError::from))
            .transpose()
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_families() {
        assert_eq!(idempotency_cache_key("k1"), "idempotency:k1");
        assert_eq!(
            status_cache_key("corr-1"),
            "notification:status:corr-1"
        );
    }
}
