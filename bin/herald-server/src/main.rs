//! Herald Orchestrator Server
//!
//! Wires the notification platform together:
//! PostgreSQL (partitioned audit store) -> Redis (idempotency + status
//! snapshots) -> RabbitMQ (per-channel fan-out) -> remote enrichment
//! services, fronted by the HTTP boundary.
//!
//! Startup is fail-fast: configuration, schema initialization, and every
//! dependency connection must succeed or the process exits non-zero.
//! Shutdown is graceful on SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::HeaderValue;
use sqlx::PgPool;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use herald_api::{create_router, AppState, HealthProbe};
use herald_broker::AmqpBrokerGateway;
use herald_cache::{CacheGateway, RedisCacheGateway};
use herald_clients::{build_http_client, HttpTemplateServiceClient, HttpUserServiceClient};
use herald_config::AppConfig;
use herald_orchestrator::{NotificationOrchestrator, RecoveryConfig, RecoveryTask};
use herald_store::{PgNotificationEventRepository, PgNotificationRepository};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    herald_common::logging::init_logging("herald-server");

    info!("Starting Herald Notification Orchestrator");

    // 1. Configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // 2. Datastore: pool, schema, partitions
    let pool = herald_store::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    herald_store::init_schema(&pool)
        .await
        .context("Failed to initialize schema")?;

    let notifications = Arc::new(PgNotificationRepository::new(pool.clone()));
    let events = Arc::new(PgNotificationEventRepository::new(pool.clone()));

    // 3. Cache
    let cache = Arc::new(
        RedisCacheGateway::connect(&config.redis)
            .await
            .context("Failed to connect to Redis")?,
    );

    // 4. Broker: topology declared on connect
    let broker = Arc::new(
        AmqpBrokerGateway::connect(config.rabbitmq.clone())
            .await
            .context("Failed to connect to RabbitMQ")?,
    );

    // 5. Remote service clients (shared pooled HTTP client)
    let http_client = build_http_client();
    let user_client = Arc::new(HttpUserServiceClient::new(
        http_client.clone(),
        config.external_services.user_service_name.clone(),
    ));
    let template_client = Arc::new(HttpTemplateServiceClient::new(
        http_client,
        config.external_services.template_service_name.clone(),
    ));

    // 6. Orchestrator
    let orchestrator = Arc::new(NotificationOrchestrator::new(
        notifications,
        events,
        cache.clone(),
        broker.clone(),
        user_client,
        template_client,
        config.orchestration.enrich_timeout(),
    ));

    // 7. Recovery loop for orphaned pending rows and retryable failures
    let recovery = RecoveryTask::new(
        orchestrator.clone(),
        RecoveryConfig::from_app_config(&config.orchestration),
    );
    let recovery_handle = tokio::spawn(async move {
        recovery.run().await;
    });

    // 8. HTTP boundary
    let state = AppState {
        orchestrator,
        database_probe: Arc::new(DatabaseProbe(pool.clone())),
        cache_probe: Arc::new(CacheProbe(cache)),
    };

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_allowed_origins));

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(port = config.server.port, "Herald orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutdown signal received, draining...");

    recovery_handle.abort();
    broker.close().await;
    pool.close().await;

    info!("Herald orchestrator shutdown complete");
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

struct DatabaseProbe(PgPool);

#[async_trait]
impl HealthProbe for DatabaseProbe {
    async fn check(&self) -> Result<(), String> {
        herald_store::ping(&self.0).await.map_err(|e| e.to_string())
    }
}

struct CacheProbe(Arc<RedisCacheGateway>);

#[async_trait]
impl HealthProbe for CacheProbe {
    async fn check(&self) -> Result<(), String> {
        self.0.ping().await.map_err(|e| e.to_string())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
