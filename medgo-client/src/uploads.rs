//! Upload listing, the HTTP side of the upload poller.

use crate::backend::{check_status, BackendClient};
use crate::error::TransportError;
use async_trait::async_trait;
use medgo_core::models::UploadPage;
use medgo_core::poller::{PollError, UploadQuery, UploadSource};
use reqwest::header::ACCEPT;
use serde_json::Value;

impl BackendClient {
    pub async fn fetch_uploads(&self, query: &UploadQuery) -> Result<UploadPage, TransportError> {
        let response = self
            .client
            .get(self.url(&self.config.uploads_path))
            .header(ACCEPT, "application/json")
            .query(&[
                ("user_id", query.user_id.clone()),
                ("limit", query.limit.to_string()),
                ("offset", query.offset.to_string()),
            ])
            .timeout(self.request_timeout())
            .send()
            .await?;
        let body: Value = check_status(response).await?.json().await?;
        Ok(UploadPage::normalize(&body))
    }
}

#[async_trait]
impl UploadSource for BackendClient {
    async fn list_uploads(&self, query: &UploadQuery) -> Result<UploadPage, PollError> {
        self.fetch_uploads(query).await.map_err(PollError::from)
    }
}
