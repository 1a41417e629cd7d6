//! User-preference service client.

use async_trait::async_trait;
use tracing::debug;

use herald_common::UserPreferences;

use crate::{get_envelope, retry::RetryPolicy, Result};

#[async_trait]
pub trait UserServiceClient: Send + Sync {
    /// `GET {base}/users/preference/{user_id}` with retries.
    async fn fetch_user_preferences(&self, user_id: &str) -> Result<UserPreferences>;
}

/// HTTP implementation of [`UserServiceClient`].
pub struct HttpUserServiceClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpUserServiceClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl UserServiceClient for HttpUserServiceClient {
    async fn fetch_user_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let url = format!(
            "{}/users/preference/{}",
            self.base_url.trim_end_matches('/'),
            user_id
        );

        let preferences = self
            .retry
            .run("user-service", || get_envelope(&self.client, &url))
            .await?;

        debug!(user_id = %user_id, "Fetched user preferences");
        Ok(preferences)
    }
}
