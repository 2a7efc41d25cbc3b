pub mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Status snapshot reported by the gateway for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStatus {
    pub state: Option<String>,
    pub owner_jid: Option<String>,
    pub profile_name: Option<String>,
    pub instance_id: Option<String>,
}

/// REST contract of the Evolution-style gateway.
///
/// Outbound traffic goes through this surface; the event channel is
/// receive-only for gateway pushes.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Provisions a fresh instance on the gateway.
    async fn create_instance(&self, instance_name: &str) -> Result<Value, GatewayError>;

    /// Restarts an existing instance. Cheap when the instance already
    /// exists; fails when it does not.
    async fn restart_instance(&self, instance_name: &str) -> Result<Value, GatewayError>;

    /// Unbinds the current session from the instance.
    async fn logout_instance(&self, instance_name: &str) -> Result<Value, GatewayError>;

    /// Requests a fresh pairing payload. The response shape varies by
    /// gateway version; see `pairing::parse_artifact`.
    async fn connect_instance(&self, instance_name: &str) -> Result<Value, GatewayError>;

    /// Sends a text message to a phone number.
    async fn send_text(
        &self,
        instance_name: &str,
        phone: &str,
        text: &str,
    ) -> Result<Value, GatewayError>;

    /// Fetches the gateway-side connection status for the instance.
    async fn fetch_status(&self, instance_name: &str) -> Result<GatewayStatus, GatewayError>;
}

/// Errors from gateway REST calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
}

impl GatewayError {
    /// Transient failures are retried by the owning component's own policy,
    /// never escalated as hard failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
        }
    }
}
