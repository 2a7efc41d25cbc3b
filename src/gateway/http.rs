use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::gateway::{GatewayApi, GatewayError, GatewayStatus};

/// reqwest-backed client for the Evolution REST surface.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpGateway {
    /// Creates a client for the given gateway base URL and API key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json(&self, path: &str) -> Result<Value, GatewayError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .header("apikey", &self.api_key)
            .send()
            .await?;
        decode(response).await
    }

    async fn post_json(&self, path: &str, body: Option<Value>) -> Result<Value, GatewayError> {
        let mut request = self
            .client
            .post(self.endpoint(path))
            .header("apikey", &self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }
        decode(request.send().await?).await
    }

    async fn delete_json(&self, path: &str) -> Result<Value, GatewayError> {
        let response = self
            .client
            .delete(self.endpoint(path))
            .header("apikey", &self.api_key)
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl GatewayApi for HttpGateway {
    async fn create_instance(&self, instance_name: &str) -> Result<Value, GatewayError> {
        self.post_json(
            "/instance/create",
            Some(json!({ "instanceName": instance_name, "qrcode": true })),
        )
        .await
    }

    async fn restart_instance(&self, instance_name: &str) -> Result<Value, GatewayError> {
        self.post_json(&format!("/instance/restart/{instance_name}"), None)
            .await
    }

    async fn logout_instance(&self, instance_name: &str) -> Result<Value, GatewayError> {
        self.delete_json(&format!("/instance/logout/{instance_name}"))
            .await
    }

    async fn connect_instance(&self, instance_name: &str) -> Result<Value, GatewayError> {
        self.get_json(&format!("/instance/connect/{instance_name}"))
            .await
    }

    async fn send_text(
        &self,
        instance_name: &str,
        phone: &str,
        text: &str,
    ) -> Result<Value, GatewayError> {
        self.post_json(
            &format!("/message/sendText/{instance_name}"),
            Some(json!({ "number": phone, "text": text })),
        )
        .await
    }

    async fn fetch_status(&self, instance_name: &str) -> Result<GatewayStatus, GatewayError> {
        let payload = self
            .get_json(&format!("/instance/connectionState/{instance_name}"))
            .await?;
        Ok(status_from_payload(&payload))
    }
}

async fn decode(response: reqwest::Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(json!({}));
    }
    // Some gateway builds answer with bare strings; keep them reachable.
    Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({ "raw": body })))
}

/// Pulls status fields out of the loosely-shaped connectionState payload.
pub fn status_from_payload(payload: &Value) -> GatewayStatus {
    let scope = payload.get("instance").unwrap_or(payload);
    GatewayStatus {
        state: scope
            .get("state")
            .and_then(Value::as_str)
            .or_else(|| scope.get("connectionStatus").and_then(Value::as_str))
            .or_else(|| scope.get("status").and_then(Value::as_str))
            .map(str::to_owned),
        owner_jid: field(scope, "ownerJid"),
        profile_name: field(scope, "profileName"),
        instance_id: field(scope, "instanceId"),
    }
}

fn field(scope: &Value, name: &str) -> Option<String> {
    scope
        .get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
}
