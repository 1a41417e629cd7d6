//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "herald.toml",
    "./config/config.toml",
    "/etc/herald/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        // Start with defaults
        let mut config = AppConfig::default();

        // Try to load from file
        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        // Check explicit path first
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        // Check ORCHESTRATOR_CONFIG env var
        if let Ok(path) = env::var("ORCHESTRATOR_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // Search standard paths
        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Database
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_HOST") {
            config.database.host = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_PORT") {
            if let Ok(port) = val.parse() {
                config.database.port = port;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_USER") {
            config.database.user = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_PASSWORD") {
            config.database.password = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_NAME") {
            config.database.name = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_SSL_MODE") {
            config.database.ssl_mode = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_MAX_OPEN_CONNS") {
            if let Ok(n) = val.parse() {
                config.database.max_open_conns = n;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_MAX_IDLE_CONNS") {
            if let Ok(n) = val.parse() {
                config.database.max_idle_conns = n;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_CONN_MAX_LIFETIME") {
            if let Ok(secs) = val.parse() {
                config.database.conn_max_lifetime = secs;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_DATABASE_CONN_MAX_IDLE_TIME") {
            if let Ok(secs) = val.parse() {
                config.database.conn_max_idle_time = secs;
            }
        }

        // Redis
        if let Ok(val) = env::var("ORCHESTRATOR_REDIS_ADDRESS") {
            config.redis.address = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_REDIS_PASSWORD") {
            config.redis.password = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_REDIS_DB") {
            if let Ok(db) = val.parse() {
                config.redis.db = db;
            }
        }

        // RabbitMQ
        if let Ok(val) = env::var("ORCHESTRATOR_RABBITMQ_URL") {
            config.rabbitmq.url = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RABBITMQ_EXCHANGE_NAME") {
            config.rabbitmq.exchange_name = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RABBITMQ_EXCHANGE_TYPE") {
            config.rabbitmq.exchange_type = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RABBITMQ_QUEUE_NAME") {
            config.rabbitmq.queue_name = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RABBITMQ_ROUTING_KEY") {
            config.rabbitmq.routing_key = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RABBITMQ_PREFETCH_COUNT") {
            if let Ok(n) = val.parse() {
                config.rabbitmq.prefetch_count = n;
            }
        }

        // Server
        if let Ok(val) = env::var("ORCHESTRATOR_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                config.server.port = port;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_SERVER_READ_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.server.read_timeout = secs;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_SERVER_WRITE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.server.write_timeout = secs;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_SERVER_IDLE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.server.idle_timeout = secs;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_SERVER_CORS_ALLOWED_ORIGINS") {
            config.server.cors_allowed_origins =
                val.split(',').map(|s| s.trim().to_string()).collect();
        }

        // External services
        if let Ok(val) = env::var("ORCHESTRATOR_EXTERNAL_SERVICES_USER_SERVICE_NAME") {
            config.external_services.user_service_name = val;
        }
        if let Ok(val) = env::var("ORCHESTRATOR_EXTERNAL_SERVICES_TEMPLATE_SERVICE_NAME") {
            config.external_services.template_service_name = val;
        }

        // Orchestration
        if let Ok(val) = env::var("ORCHESTRATOR_ENRICH_TIMEOUT_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.orchestration.enrich_timeout_seconds = secs;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RECOVERY_ENABLED") {
            config.orchestration.recovery_enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RECOVERY_INTERVAL_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.orchestration.recovery_interval_seconds = secs;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_STALE_PENDING_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.orchestration.stale_pending_seconds = secs;
            }
        }
        if let Ok(val) = env::var("ORCHESTRATOR_RECOVERY_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.orchestration.recovery_batch_size = n;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9999\n\n[rabbitmq]\nexchange_name = \"alerts\"\n"
        )
        .unwrap();

        let loader = ConfigLoader::with_path(file.path());
        let config = loader.load().unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.rabbitmq.exchange_name, "alerts");
        // Untouched sections keep defaults
        assert_eq!(config.database.port, 5432);
    }

    #[test]
    fn defaults_when_no_file_present() {
        let loader = ConfigLoader::with_path("/nonexistent/herald.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.rabbitmq.exchange_type, "topic");
    }
}
