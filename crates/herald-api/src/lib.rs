//! Herald HTTP Boundary
//!
//! HTTP API endpoints for:
//! - Notification ingest (idempotent, fire-and-forget enrichment)
//! - Asynchronous status reads by correlation id
//! - Worker status callbacks
//! - Per-user listing with keyset pagination
//! - Soft delete
//! - Health and Kubernetes probes
//! - OpenAPI documentation (Swagger UI)

use axum::{
    routing::{delete, get, post},
    Router,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use herald_orchestrator::NotificationOrchestrator;

pub mod envelope;
pub mod error;
pub mod handlers;
pub mod model;

pub use envelope::{ApiResponse, PaginationMeta};
pub use error::ApiError;

/// A pingable dependency surfaced through `/health`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<NotificationOrchestrator>,
    pub database_probe: Arc<dyn HealthProbe>,
    pub cache_probe: Arc<dyn HealthProbe>,
}

/// One dependency's health check result.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheck {
    /// `up` or `down`
    pub status: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    pub database: HealthCheck,
    pub redis: HealthCheck,
}

/// `GET /health` document.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`
    pub status: String,
    pub checks: HealthChecks,
}

/// Kubernetes probe response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProbeResponse {
    /// LIVE, READY, NOT_READY
    pub status: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_notification,
        handlers::get_status,
        handlers::status_callback,
        handlers::get_events,
        handlers::list_notifications,
        handlers::delete_notification,
        handlers::health,
        handlers::live,
        handlers::ready,
    ),
    components(schemas(
        model::CreateNotificationRequest,
        model::NotificationAccepted,
        model::StatusCallbackRequest,
        model::StatusView,
        model::NotificationPageData,
        envelope::PaginationMeta,
        HealthCheck,
        HealthChecks,
        HealthResponse,
        ProbeResponse,
        herald_common::Notification,
        herald_common::NotificationEvent,
        herald_common::Channel,
        herald_common::NotificationStatus,
        herald_common::Priority,
        herald_common::ErrorCode,
        herald_common::EventType,
    )),
    tags(
        (name = "notifications", description = "Notification orchestration"),
        (name = "health", description = "Health and probes"),
    ),
    info(title = "Herald Orchestrator API", version = "0.1.0")
)]
pub struct ApiDoc;

/// Build the service router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/notification", post(handlers::create_notification))
        .route(
            "/notification/status/{correlation_id}",
            get(handlers::get_status),
        )
        .route("/notification/{id}/status", post(handlers::status_callback))
        .route("/notification/{id}/events", get(handlers::get_events))
        .route("/notification/{id}", delete(handlers::delete_notification))
        .route("/notifications", get(handlers::list_notifications))
        .route("/health", get(handlers::health))
        .route("/health/live", get(handlers::live))
        .route("/health/ready", get(handlers::ready))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
