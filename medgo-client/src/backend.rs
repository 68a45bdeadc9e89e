//! Shared HTTP plumbing for every backend call.

use crate::error::TransportError;
use medgo_core::config::BackendConfig;
use reqwest::{Client, Response};
use std::time::Duration;

/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct BackendClient {
    pub(crate) client: Client,
    pub(crate) config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, TransportError> {
        // Chat streams have no overall timeout; plain requests set one per call.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    /// Same configuration, different server (tests, `--server`).
    pub fn with_base_url(
        config: BackendConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, TransportError> {
        Self::new(BackendConfig {
            base_url: base_url.into(),
            ..config
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_seconds)
    }
}

/// Turn a non-2xx response into [`TransportError::Status`], keeping the body
/// text for the log.
pub(crate) async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(code = status.as_u16(), url = %url, body = %body, "Backend request failed");
    Err(TransportError::Status {
        code: status.as_u16(),
        body,
    })
}
