//! Herald Orchestrator Service
//!
//! The central coordinator of the notification platform. For every admitted
//! request it:
//! 1. enforces idempotency (cache fast path, datastore authoritative),
//! 2. concurrently enriches against the user-preference and template
//!    services,
//! 3. persists the notification with a full state-machine audit trail,
//! 4. fans out one durable, channel-routed broker message,
//! 5. surfaces asynchronous status through cache snapshots.
//!
//! A background recovery loop re-drives orphaned `pending` rows and
//! retryable `failed` rows; combined with the idempotency constraints this
//! yields at-least-once progress with at-most-once user-visible delivery.

mod recovery;
mod service;

pub use recovery::{RecoveryConfig, RecoveryTask};
pub use service::{
    AdmissionError, AdmissionOutcome, NewNotificationRequest, NotificationOrchestrator,
};
