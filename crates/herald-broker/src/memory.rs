//! In-memory publisher double for service-level tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use herald_common::EnrichedNotification;

use crate::{BrokerError, ChannelPublisher, Result};

/// Records published messages; can be toggled to fail for outage scenarios.
#[derive(Default)]
pub struct InMemoryChannelPublisher {
    published: Mutex<Vec<EnrichedNotification>>,
    fail: Mutex<bool>,
}

impl InMemoryChannelPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn published(&self) -> Vec<EnrichedNotification> {
        self.published.lock().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl ChannelPublisher for InMemoryChannelPublisher {
    async fn publish(&self, notification: &EnrichedNotification) -> Result<String> {
        if *self.fail.lock() {
            return Err(BrokerError::Publish("broker unreachable".to_string()));
        }
        self.published.lock().push(notification.clone());
        Ok(notification.notification_id.to_string())
    }
}
