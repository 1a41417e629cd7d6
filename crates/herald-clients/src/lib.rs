//! Remote Service Clients
//!
//! HTTP clients for the user-preference and template services with:
//! - a shared pooled `reqwest::Client`
//! - bounded exponential backoff with full jitter
//! - permanent-error short-circuiting: 4xx responses and malformed payloads
//!   stop retries immediately; 5xx, timeouts, and connection errors consume
//!   the retry budget

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

mod memory;
mod retry;
mod template;
mod user;

pub use memory::{StaticTemplateServiceClient, StaticUserServiceClient};
pub use retry::RetryPolicy;
pub use template::{HttpTemplateServiceClient, TemplateServiceClient};
pub use user::{HttpUserServiceClient, UserServiceClient};

/// Client error types, split by whether a retry can help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// 4xx from the remote; retrying cannot succeed.
    #[error("HTTP {status}: {message}")]
    Permanent { status: u16, message: String },

    /// The remote answered but declined (`success = false` envelope).
    #[error("Service declined: {0}")]
    Declined(String),

    /// The remote answered 2xx but the payload did not conform.
    #[error("Malformed response: {0}")]
    Parse(String),

    /// 5xx, timeout, or connection error; worth retrying.
    #[error("Transient error: {0}")]
    Transient(String),
}

impl ClientError {
    /// Errors that short-circuit the retry loop.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, ClientError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Standard envelope the remote services answer with.
#[derive(Debug, Deserialize)]
pub struct RemoteEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Build the shared HTTP client the way the platform builds all of its
/// outbound clients: bounded per-attempt timeout, connection pooling with
/// per-host idle caps.
pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build HTTP client")
}

/// One GET attempt: classify the response and unwrap the envelope.
pub(crate) async fn get_envelope<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T> {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            let kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connection error"
            } else {
                "request error"
            };
            warn!(url = %url, error = %e, "Remote request failed ({kind})");
            return Err(ClientError::Transient(format!("{kind}: {e}")));
        }
    };

    let status = response.status();

    if status.is_client_error() {
        // Permanent: the request itself is wrong (unknown id, bad route).
        return Err(ClientError::Permanent {
            status: status.as_u16(),
            message: format!("remote replied {status}"),
        });
    }
    if !status.is_success() {
        return Err(ClientError::Transient(format!("remote replied {status}")));
    }

    let envelope: RemoteEnvelope<T> = response
        .json()
        .await
        .map_err(|e| ClientError::Parse(e.to_string()))?;

    if !envelope.success {
        let reason = envelope
            .error
            .or(envelope.message)
            .unwrap_or_else(|| "no reason given".to_string());
        return Err(ClientError::Declined(reason));
    }

    debug!(url = %url, "Remote fetch succeeded");
    envelope
        .data
        .ok_or_else(|| ClientError::Parse("envelope carried no data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanence_classification() {
        assert!(ClientError::Permanent {
            status: 404,
            message: String::new()
        }
        .is_permanent());
        assert!(ClientError::Declined("opted out".to_string()).is_permanent());
        assert!(ClientError::Parse("bad json".to_string()).is_permanent());
        assert!(!ClientError::Transient("503".to_string()).is_permanent());
    }
}
