//! Template service client.

use async_trait::async_trait;
use tracing::debug;

use herald_common::Template;

use crate::{get_envelope, retry::RetryPolicy, Result};

#[async_trait]
pub trait TemplateServiceClient: Send + Sync {
    /// `GET {base}/template/{template_id}` with retries.
    async fn fetch_template_by_id(&self, template_id: &str) -> Result<Template>;
}

/// HTTP implementation of [`TemplateServiceClient`].
pub struct HttpTemplateServiceClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpTemplateServiceClient {
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
impl TemplateServiceClient for HttpTemplateServiceClient {
    async fn fetch_template_by_id(&self, template_id: &str) -> Result<Template> {
        let url = format!(
            "{}/template/{}",
            self.base_url.trim_end_matches('/'),
            template_id
        );

        let template = self
            .retry
            .run("template-service", || get_envelope(&self.client, &url))
            .await?;

        debug!(template_id = %template_id, "Fetched template");
        Ok(template)
    }
}
