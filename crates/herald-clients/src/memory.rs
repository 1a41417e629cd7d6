//! Canned client doubles for service-level tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use herald_common::{Template, UserPreferences};

use crate::{ClientError, Result, TemplateServiceClient, UserServiceClient};

/// Returns a fixed result for every user.
pub struct StaticUserServiceClient {
    response: Mutex<Result<UserPreferences>>,
    calls: Mutex<u32>,
}

impl StaticUserServiceClient {
    pub fn ok(preferences: UserPreferences) -> Self {
        Self {
            response: Mutex::new(Ok(preferences)),
            calls: Mutex::new(0),
        }
    }

    pub fn failing(error: ClientError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl UserServiceClient for StaticUserServiceClient {
    async fn fetch_user_preferences(&self, _user_id: &str) -> Result<UserPreferences> {
        *self.calls.lock() += 1;
        self.response.lock().clone()
    }
}

/// Returns a fixed result for every template code.
pub struct StaticTemplateServiceClient {
    response: Mutex<Result<Template>>,
    calls: Mutex<u32>,
}

impl StaticTemplateServiceClient {
    pub fn ok(template: Template) -> Self {
        Self {
            response: Mutex::new(Ok(template)),
            calls: Mutex::new(0),
        }
    }

    pub fn failing(error: ClientError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl TemplateServiceClient for StaticTemplateServiceClient {
    async fn fetch_template_by_id(&self, _template_id: &str) -> Result<Template> {
        *self.calls.lock() += 1;
        self.response.lock().clone()
    }
}
