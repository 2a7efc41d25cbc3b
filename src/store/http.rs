use async_trait::async_trait;
use reqwest::Client;

use crate::store::{ConnectionPatch, InstanceRecord, InstanceStore, StoreError};

/// PostgREST-style key-filtered store over an `instances` resource.
#[derive(Clone)]
pub struct HttpInstanceStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpInstanceStore {
    /// Creates a store client for the given base URL and API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn filtered(&self, tenant_id: &str) -> String {
        format!("{}/instances?tenant_id=eq.{tenant_id}", self.base_url)
    }
}

#[async_trait]
impl InstanceStore for HttpInstanceStore {
    async fn load(&self, tenant_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let response = self
            .client
            .get(self.filtered(tenant_id))
            .header("apikey", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<InstanceRecord> = serde_json::from_str(&body)?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/instances", self.base_url))
            .header("apikey", &self.api_key)
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;
        expect_success(response).await
    }

    async fn patch(&self, tenant_id: &str, patch: &ConnectionPatch) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.filtered(tenant_id))
            .header("apikey", &self.api_key)
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await?;
        expect_success(response).await
    }
}

async fn expect_success(response: reqwest::Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}
