//! Where the backend lives. Asked again before every connect attempt.

use async_trait::async_trait;
use lily_common::LinkError;

#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// WebSocket URL to connect to next.
    async fn resolve(&self) -> Result<String, LinkError>;
}

/// A fixed URL from configuration.
#[derive(Debug, Clone)]
pub struct StaticEndpoint {
    url: String,
}

impl StaticEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn resolve(&self) -> Result<String, LinkError> {
        if self.url.is_empty() {
            return Err(LinkError::Resolve("no backend url configured".into()));
        }
        Ok(self.url.clone())
    }
}
