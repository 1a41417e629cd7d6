//! Background recovery for orphaned and failed notifications.
//!
//! A crash between admission and enrichment leaves rows in `pending`;
//! enrichment failures leave retryable rows in `failed`. This task
//! periodically re-drives both. Re-dispatch is safe to race: enrichment
//! starts with a `pending -> enriching` compare-and-swap and retry claiming
//! uses `FOR UPDATE SKIP LOCKED`, so no row is driven twice.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use herald_store::NotificationRepository;

use crate::service::NotificationOrchestrator;

/// Configuration for the recovery task.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to scan. Default: 60 seconds.
    pub check_interval: Duration,
    /// Age after which a `pending` row counts as orphaned. Default: 120s.
    pub stale_pending_age: Duration,
    /// Rows picked up per scan, per category.
    pub batch_size: u32,
    /// Whether recovery is enabled. Default: true.
    pub enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            stale_pending_age: Duration::from_secs(120),
            batch_size: 50,
            enabled: true,
        }
    }
}

impl RecoveryConfig {
    pub fn from_app_config(config: &herald_config::OrchestrationConfig) -> Self {
        Self {
            check_interval: config.recovery_interval(),
            stale_pending_age: config.stale_pending_age(),
            batch_size: config.recovery_batch_size,
            enabled: config.recovery_enabled,
        }
    }
}

/// Background task that re-drives stuck notifications.
pub struct RecoveryTask {
    orchestrator: Arc<NotificationOrchestrator>,
    config: RecoveryConfig,
}

impl RecoveryTask {
    pub fn new(orchestrator: Arc<NotificationOrchestrator>, config: RecoveryConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Run the recovery loop. Runs until the owning task is aborted.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Notification recovery task is disabled");
            return;
        }

        info!(
            interval_secs = self.config.check_interval.as_secs(),
            stale_pending_secs = self.config.stale_pending_age.as_secs(),
            batch_size = self.config.batch_size,
            "Starting notification recovery task"
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.recover_once().await;
        }
    }

    /// Perform a single recovery scan.
    pub async fn recover_once(&self) {
        debug!("Scanning for stuck notifications");

        // Orphaned pending rows: admitted, never enriched.
        match self
            .orchestrator
            .notifications()
            .get_stale_pending(self.config.stale_pending_age, self.config.batch_size)
            .await
        {
            Ok(stale) => {
                if !stale.is_empty() {
                    info!(count = stale.len(), "Re-dispatching stale pending notifications");
                }
                for notification in stale {
                    self.orchestrator.clone().spawn_enrichment(notification);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to scan stale pending notifications");
            }
        }

        // Retryable failures: claimed (moved to `enriching`) by the store.
        match self
            .orchestrator
            .notifications()
            .get_failed_for_retry(self.config.batch_size)
            .await
        {
            Ok(retries) => {
                if !retries.is_empty() {
                    info!(count = retries.len(), "Retrying failed notifications");
                }
                for notification in retries {
                    self.orchestrator.record_retry(&notification).await;
                    self.orchestrator.clone().spawn_enrichment(notification);
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to claim retryable notifications");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RecoveryConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.stale_pending_age, Duration::from_secs(120));
        assert!(config.enabled);
    }
}
