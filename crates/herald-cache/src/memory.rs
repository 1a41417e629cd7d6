//! In-memory cache double for service-level tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use herald_common::StatusSnapshot;

use crate::{CacheGateway, Result};

/// Hash-map backed [`CacheGateway`]; TTLs are not simulated.
#[derive(Default)]
pub struct InMemoryCacheGateway {
    idempotency: Mutex<HashMap<String, String>>,
    status: Mutex<HashMap<String, StatusSnapshot>>,
    /// When set, every operation fails; used to exercise degraded paths.
    unavailable: Mutex<bool>,
}

impl InMemoryCacheGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn status_of(&self, correlation_id: &str) -> Option<StatusSnapshot> {
        self.status.lock().get(correlation_id).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(crate::CacheError::Connection(
                "cache unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheGateway for InMemoryCacheGateway {
    async fn put_idempotency_key(&self, key: &str, correlation_id: &str) -> Result<bool> {
        self.check_available()?;
        let mut map = self.idempotency.lock();
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), correlation_id.to_string());
        Ok(true)
    }

    async fn get_idempotency_key(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.idempotency.lock().get(key).cloned())
    }

    async fn force_idempotency_key(&self, key: &str, correlation_id: &str) -> Result<()> {
        self.check_available()?;
        self.idempotency
            .lock()
            .insert(key.to_string(), correlation_id.to_string());
        Ok(())
    }

    async fn put_status(&self, correlation_id: &str, snapshot: &StatusSnapshot) -> Result<()> {
        self.check_available()?;
        self.status
            .lock()
            .insert(correlation_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn get_status(&self, correlation_id: &str) -> Result<Option<StatusSnapshot>> {
        self.check_available()?;
        Ok(self.status.lock().get(correlation_id).cloned())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
