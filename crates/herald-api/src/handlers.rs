//! HTTP handlers: ingest, status, worker callbacks, listing, health.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use herald_cache::CacheGateway;
use herald_common::{
    ErrorCode, EventType, NotificationEvent, NotificationStatus,
};
use herald_orchestrator::{AdmissionOutcome, NewNotificationRequest};
use herald_store::{NotificationEventRepository, NotificationRepository};

use crate::envelope::{ApiResponse, PaginationMeta};
use crate::error::{ApiError, Result};
use crate::model::{
    CreateNotificationRequest, ListNotificationsQuery, NotificationAccepted,
    NotificationPageData, StatusCallbackRequest, StatusView,
};
use crate::{AppState, HealthCheck, HealthChecks, HealthResponse, ProbeResponse};

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";
const CORRELATION_HEADER: &str = "X-Correlation-ID";

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Ingest
// ============================================================================

/// Accept a notification request.
///
/// Validates, runs the idempotency admission, persists the pending row, and
/// hands enrichment to a detached task. The response never waits for
/// enrichment: duplicates answer `200` with the original correlation id,
/// fresh requests answer `202`.
#[utoipa::path(
    post,
    path = "/notification",
    request_body = CreateNotificationRequest,
    params(
        ("X-Idempotency-Key" = String, Header, description = "Caller-chosen deduplication token"),
        ("X-Correlation-ID" = Option<String>, Header, description = "Trace id; generated when absent"),
    ),
    responses(
        (status = 202, description = "Accepted for processing", body = NotificationAccepted),
        (status = 200, description = "Duplicate request", body = NotificationAccepted),
        (status = 400, description = "Validation failure"),
        (status = 500, description = "Dependency unavailable"),
    ),
    tag = "notifications"
)]
pub async fn create_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> Result<Response> {
    let body: CreateNotificationRequest = serde_json::from_value(raw)
        .map_err(|e| ApiError::validation(format!("invalid request body: {e}")))?;
    let channel = body.validate()?;

    let idempotency_key = header_value(&headers, IDEMPOTENCY_HEADER)
        .ok_or(ApiError::MissingHeader(IDEMPOTENCY_HEADER))?;
    let correlation_id = header_value(&headers, CORRELATION_HEADER)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // The caller's request id travels in the opaque metadata map.
    let mut metadata = body.metadata.clone().unwrap_or_else(|| json!({}));
    match metadata.as_object_mut() {
        Some(map) => {
            map.entry("request_id").or_insert(json!(body.request_id));
        }
        None => return Err(ApiError::validation("metadata must be an object")),
    }

    let priority = body.priority();
    let outcome = state
        .orchestrator
        .admit(NewNotificationRequest {
            user_id: body.user_id,
            template_code: body.template_code,
            channel,
            priority,
            variables: body.variables,
            metadata,
            correlation_id: correlation_id.clone(),
            idempotency_key: idempotency_key.clone(),
        })
        .await?;

    match outcome {
        AdmissionOutcome::Accepted(notification) => {
            info!(
                notification_id = %notification.id,
                correlation_id = %notification.correlation_id,
                "Accepted notification request"
            );
            let accepted = NotificationAccepted {
                correlation_id: notification.correlation_id.clone(),
                idempotency_key,
                status: "processing".to_string(),
            };
            state.orchestrator.clone().spawn_enrichment(notification);

            Ok((
                StatusCode::ACCEPTED,
                Json(ApiResponse::ok(accepted, "Notification accepted")),
            )
                .into_response())
        }
        AdmissionOutcome::Duplicate { correlation_id } => {
            debug!(
                idempotency_key = %idempotency_key,
                correlation_id = %correlation_id,
                "Duplicate notification request"
            );
            let accepted = NotificationAccepted {
                correlation_id,
                idempotency_key,
                status: "processing".to_string(),
            };

            Ok((
                StatusCode::OK,
                Json(ApiResponse::ok(accepted, "Duplicate request")),
            )
                .into_response())
        }
    }
}

// ============================================================================
// Status read
// ============================================================================

/// Asynchronous status by correlation id: cache snapshot first, datastore
/// fallback.
#[utoipa::path(
    get,
    path = "/notification/status/{correlation_id}",
    params(("correlation_id" = String, Path, description = "Correlation id from the accept response")),
    responses(
        (status = 200, description = "Current status", body = StatusView),
        (status = 404, description = "Unknown correlation id"),
    ),
    tag = "notifications"
)]
pub async fn get_status(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ApiResponse<StatusView>>> {
    match state.orchestrator.cache().get_status(&correlation_id).await {
        Ok(Some(snapshot)) => {
            return Ok(Json(ApiResponse::ok(
                StatusView {
                    correlation_id,
                    status: snapshot.status,
                    error: snapshot.error,
                    updated_at: snapshot.updated_at,
                },
                "Status from cache",
            )));
        }
        Ok(None) => {}
        Err(e) => {
            // Degraded cache only costs the fast path.
            warn!(correlation_id = %correlation_id, error = %e, "Status cache read failed");
        }
    }

    let notification = state
        .orchestrator
        .notifications()
        .get_by_correlation_id(&correlation_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(ApiResponse::ok(
        StatusView {
            correlation_id,
            status: notification.status,
            error: notification.error_message,
            updated_at: notification.updated_at,
        },
        "Status from datastore",
    )))
}

// ============================================================================
// Worker status callback
// ============================================================================

/// Apply a worker-reported transition (`queued -> processing`,
/// `processing -> sent`, `sent -> delivered/failed`, ...), append the
/// matching event, and refresh the status snapshot.
#[utoipa::path(
    post,
    path = "/notification/{id}/status",
    request_body = StatusCallbackRequest,
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Transition applied", body = herald_common::Notification),
        (status = 400, description = "Unknown status or error code"),
        (status = 404, description = "Unknown notification"),
        (status = 409, description = "Illegal transition"),
    ),
    tag = "notifications"
)]
pub async fn status_callback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(raw): Json<Value>,
) -> Result<Json<ApiResponse<herald_common::Notification>>> {
    let body: StatusCallbackRequest = serde_json::from_value(raw)
        .map_err(|e| ApiError::validation(format!("invalid request body: {e}")))?;

    let notification = state
        .orchestrator
        .notifications()
        .get_by_id(id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let new_status = NotificationStatus::parse(&body.status)
        .ok_or_else(|| ApiError::validation(format!("unknown status: {}", body.status)))?;

    if !notification.status.can_transition_to(new_status) {
        return Err(ApiError::conflict(format!(
            "{} -> {}",
            notification.status, new_status
        )));
    }

    if new_status == NotificationStatus::Failed {
        let code = match &body.error_code {
            Some(raw_code) => ErrorCode::parse(raw_code)
                .ok_or_else(|| ApiError::validation(format!("unknown error code: {raw_code}")))?,
            None => return Err(ApiError::validation("error_code is required for failed")),
        };
        let message = body
            .error_message
            .as_deref()
            .unwrap_or("reported by worker");
        state
            .orchestrator
            .notifications()
            .update_failure(id, code, message)
            .await?;
    } else {
        state
            .orchestrator
            .notifications()
            .transition(id, notification.status, new_status)
            .await?;
    }

    if body.provider.is_some() || body.provider_message_id.is_some() {
        state
            .orchestrator
            .notifications()
            .update_provider(
                id,
                body.provider.as_deref(),
                body.provider_message_id.as_deref(),
            )
            .await?;
    }

    if let Some(event_type) = new_status.event_type() {
        append_callback_event(&state, &notification, event_type, &body).await;
    }

    state
        .orchestrator
        .snapshot_status(
            &notification.correlation_id,
            new_status,
            body.error_message.clone(),
        )
        .await;

    let updated = state
        .orchestrator
        .notifications()
        .get_by_id(id)
        .await?
        .ok_or(ApiError::NotFound)?;

    info!(
        notification_id = %id,
        from = %notification.status,
        to = %new_status,
        "Applied worker status callback"
    );

    Ok(Json(ApiResponse::ok(updated, "Status updated")))
}

async fn append_callback_event(
    state: &AppState,
    notification: &herald_common::Notification,
    event_type: EventType,
    body: &StatusCallbackRequest,
) {
    let event = NotificationEvent::new(
        notification,
        event_type,
        body.event_data.clone().unwrap_or_else(|| json!({})),
    )
    .with_provider(body.provider.clone());

    if let Err(e) = state.orchestrator.events().create_event(&event).await {
        warn!(
            notification_id = %notification.id,
            event_type = %event_type,
            error = %e,
            "Failed to append callback event"
        );
    }
}

// ============================================================================
// Events, listing, delete
// ============================================================================

/// Audit trail for one notification.
#[utoipa::path(
    get,
    path = "/notification/{id}/events",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Events, oldest first", body = [herald_common::NotificationEvent]),
        (status = 404, description = "Unknown notification"),
    ),
    tag = "notifications"
)]
pub async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<herald_common::NotificationEvent>>>> {
    state
        .orchestrator
        .notifications()
        .get_by_id(id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let events = state.orchestrator.events().get_by_notification(id).await?;
    Ok(Json(ApiResponse::ok(events, "Notification events")))
}

/// Keyset-paginated listing of a user's notifications, newest first.
#[utoipa::path(
    get,
    path = "/notifications",
    params(
        ("user_id" = String, Query, description = "User to list"),
        ("limit" = Option<u32>, Query, description = "Page size (1-100, default 20)"),
        ("cursor" = Option<String>, Query, description = "created_at of the previous page's last row"),
    ),
    responses((status = 200, description = "One page", body = NotificationPageData)),
    tag = "notifications"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<ApiResponse<NotificationPageData>>> {
    if query.user_id.trim().is_empty() {
        return Err(ApiError::validation("user_id is required"));
    }

    let limit = query.limit();
    let page = state
        .orchestrator
        .notifications()
        .get_user_notifications(&query.user_id, limit, query.cursor)
        .await?;
    let total = state
        .orchestrator
        .notifications()
        .count_user_notifications(&query.user_id)
        .await?;

    let meta = PaginationMeta::new(
        total,
        limit,
        0,
        page.next_cursor.is_some(),
        query.cursor.is_some(),
    );

    Ok(Json(ApiResponse::ok_with_meta(
        NotificationPageData {
            items: page.items,
            next_cursor: page.next_cursor,
        },
        "User notifications",
        meta,
    )))
}

/// Soft-delete a notification.
#[utoipa::path(
    delete,
    path = "/notification/{id}",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 404, description = "Unknown notification"),
    ),
    tag = "notifications"
)]
pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>> {
    state.orchestrator.notifications().soft_delete(id).await?;
    info!(notification_id = %id, "Soft-deleted notification");
    Ok(Json(ApiResponse::ok(
        json!({"id": id}),
        "Notification deleted",
    )))
}

// ============================================================================
// Health & probes
// ============================================================================

const DEPENDENCY_PING_BUDGET: std::time::Duration = std::time::Duration::from_secs(5);

async fn run_probe(probe: &dyn crate::HealthProbe) -> HealthCheck {
    let started = Instant::now();
    let outcome = tokio::time::timeout(DEPENDENCY_PING_BUDGET, probe.check()).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(())) => HealthCheck {
            status: "up".to_string(),
            latency_ms,
            error: None,
        },
        Ok(Err(e)) => HealthCheck {
            status: "down".to_string(),
            latency_ms,
            error: Some(e),
        },
        Err(_) => HealthCheck {
            status: "down".to_string(),
            latency_ms,
            error: Some("ping timed out".to_string()),
        },
    }
}

/// Liveness + readiness in one document; `503` when any dependency fails.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "All dependencies healthy", body = HealthResponse),
        (status = 503, description = "A dependency is down", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Response {
    let (database, redis) = tokio::join!(
        run_probe(state.database_probe.as_ref()),
        run_probe(state.cache_probe.as_ref()),
    );

    let healthy = database.status == "up" && redis.status == "up";
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        checks: HealthChecks { database, redis },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Kubernetes liveness probe.
#[utoipa::path(
    get,
    path = "/health/live",
    responses((status = 200, description = "Process is serving", body = ProbeResponse)),
    tag = "health"
)]
pub async fn live() -> Json<ProbeResponse> {
    Json(ProbeResponse {
        status: "LIVE".to_string(),
    })
}

/// Kubernetes readiness probe; gated on dependencies.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Ready for traffic", body = ProbeResponse),
        (status = 503, description = "Not ready", body = ProbeResponse),
    ),
    tag = "health"
)]
pub async fn ready(State(state): State<AppState>) -> Response {
    let (database, redis) = tokio::join!(
        run_probe(state.database_probe.as_ref()),
        run_probe(state.cache_probe.as_ref()),
    );

    if database.status == "up" && redis.status == "up" {
        (
            StatusCode::OK,
            Json(ProbeResponse {
                status: "READY".to_string(),
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeResponse {
                status: "NOT_READY".to_string(),
            }),
        )
            .into_response()
    }
}
