pub mod http;
pub mod memory;

pub use http::HttpInstanceStore;
pub use memory::MemoryInstanceStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted connection state for one tenant's instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub tenant_id: String,
    pub instance_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub remote_instance_id: Option<String>,
    #[serde(default)]
    pub connected: bool,
}

/// Fields written on a status transition. `None` clears the column.
///
/// `connected` is derived canonically from the in-memory state
/// (`state == Connected`); no second derivation exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionPatch {
    pub phone: Option<String>,
    pub remote_instance_id: Option<String>,
    pub connected: bool,
}

impl ConnectionPatch {
    /// Patch applied when a session binds to a phone.
    pub fn connected(phone: String, remote_instance_id: Option<String>) -> Self {
        Self {
            phone: Some(phone),
            remote_instance_id,
            connected: true,
        }
    }

    /// Patch applied when a session ends; clears phone and remote id.
    pub fn disconnected() -> Self {
        Self {
            phone: None,
            remote_instance_id: None,
            connected: false,
        }
    }
}

/// Key-filtered persistence contract for instance records.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Loads the record for a tenant, if one exists.
    async fn load(&self, tenant_id: &str) -> Result<Option<InstanceRecord>, StoreError>;

    /// Creates a new record.
    async fn insert(&self, record: &InstanceRecord) -> Result<(), StoreError>;

    /// Applies a connection patch to the tenant's record.
    async fn patch(&self, tenant_id: &str, patch: &ConnectionPatch) -> Result<(), StoreError>;
}

/// Errors from persistence API calls.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("store response decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
