use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{ConnectionPatch, InstanceRecord, InstanceStore, StoreError};

/// In-memory store used by tests and lightweight local runs.
///
/// Applied patches are kept for inspection, mirroring what the HTTP store
/// would have sent over the wire.
#[derive(Clone, Default)]
pub struct MemoryInstanceStore {
    records: Arc<RwLock<HashMap<String, InstanceRecord>>>,
    patches: Arc<RwLock<Vec<(String, ConnectionPatch)>>>,
}

impl MemoryInstanceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every patch applied so far, oldest first.
    pub async fn applied_patches(&self) -> Vec<(String, ConnectionPatch)> {
        self.patches.read().await.clone()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn load(&self, tenant_id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        Ok(self.records.read().await.get(tenant_id).cloned())
    }

    async fn insert(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.tenant_id.clone(), record.clone());
        Ok(())
    }

    async fn patch(&self, tenant_id: &str, patch: &ConnectionPatch) -> Result<(), StoreError> {
        if let Some(record) = self.records.write().await.get_mut(tenant_id) {
            record.phone = patch.phone.clone();
            record.remote_instance_id = patch.remote_instance_id.clone();
            record.connected = patch.connected;
        }
        self.patches
            .write()
            .await
            .push((tenant_id.to_owned(), patch.clone()));
        Ok(())
    }
}
