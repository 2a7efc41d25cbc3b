pub mod handle;
pub mod runner;
pub mod status;

pub use handle::InstanceHandle;
pub use status::{ConnectionState, InstanceStatus};

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{RwLock, broadcast, mpsc};

use crate::{
    channel::ChannelConfig,
    config::Config,
    diagnostics::ConnectionLog,
    error::ConnectError,
    gateway::GatewayApi,
    store::{InstanceRecord, InstanceStore},
};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Owns one runner task per tenant and hands out handles to them.
pub struct InstanceManager {
    instances: Arc<RwLock<HashMap<String, InstanceHandle>>>,
    gateway: Arc<dyn GatewayApi>,
    store: Arc<dyn InstanceStore>,
    config: Arc<Config>,
}

impl InstanceManager {
    pub fn new(
        gateway: Arc<dyn GatewayApi>,
        store: Arc<dyn InstanceStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            gateway,
            store,
            config,
        }
    }

    /// Derives the tenant's instance name from its display name and stores
    /// the record. Returns the existing record unchanged when one is
    /// already present, so repeat calls are safe.
    pub async fn provision(
        &self,
        tenant_id: &str,
        display_name: &str,
    ) -> Result<InstanceRecord, ConnectError> {
        if let Some(existing) = self.store.load(tenant_id).await? {
            return Ok(existing);
        }

        let instance_name = derive_instance_name(display_name);
        if instance_name.is_empty() {
            return Err(ConnectError::InvalidName);
        }

        let record = InstanceRecord {
            tenant_id: tenant_id.to_owned(),
            instance_name,
            phone: None,
            remote_instance_id: None,
            connected: false,
        };
        self.store.insert(&record).await?;
        tracing::info!(
            tenant = %record.tenant_id,
            instance = %record.instance_name,
            "instance record provisioned"
        );
        Ok(record)
    }

    /// Spawns (or returns) the runner for a tenant's instance.
    ///
    /// Fails with [`ConnectError::NotConfigured`] when the tenant has no
    /// provisioned record.
    pub async fn open(&self, tenant_id: &str) -> Result<InstanceHandle, ConnectError> {
        if let Some(handle) = self.instances.read().await.get(tenant_id) {
            return Ok(handle.clone());
        }

        let record = self
            .store
            .load(tenant_id)
            .await?
            .ok_or(ConnectError::NotConfigured)?;

        let mut instances = self.instances.write().await;
        // A concurrent open may have won the race while the record loaded.
        if let Some(handle) = instances.get(tenant_id) {
            return Ok(handle.clone());
        }

        let handle = self.spawn_runner(tenant_id, &record.instance_name);
        instances.insert(tenant_id.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Handle for a tenant whose runner is already open.
    pub async fn get(&self, tenant_id: &str) -> Option<InstanceHandle> {
        self.instances.read().await.get(tenant_id).cloned()
    }

    /// Number of open runners.
    pub async fn count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Stops a tenant's runner and drops its handle.
    pub async fn close(&self, tenant_id: &str) -> Result<(), ConnectError> {
        let removed = self.instances.write().await.remove(tenant_id);
        match removed {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }

    fn spawn_runner(&self, tenant_id: &str, instance_name: &str) -> InstanceHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let status = Arc::new(RwLock::new(InstanceStatus::default()));
        let log = ConnectionLog::new();

        let tracker = status::StatusTracker::new(
            tenant_id.to_owned(),
            instance_name.to_owned(),
            status.clone(),
            self.store.clone(),
            event_tx.clone(),
            log.clone(),
        );
        let context = runner::RunnerContext {
            instance_name: instance_name.to_owned(),
            gateway: self.gateway.clone(),
            channel_config: ChannelConfig {
                ws_base_url: self.config.gateway_ws_url.clone(),
                api_key: self.config.gateway_api_key.clone(),
                reconnect_delay: self.config.reconnect_delay,
                max_reconnect_attempts: self.config.max_reconnect_attempts,
            },
            pairing_refresh: self.config.pairing_refresh,
            log: log.clone(),
        };

        tokio::spawn(runner::run(context, tracker, command_rx));

        InstanceHandle::new(
            instance_name.to_owned(),
            command_tx,
            status,
            event_tx,
            log,
        )
    }
}

/// Derives a gateway instance name from a tenant's display name.
///
/// Lowercases, folds common Latin diacritics to their base letter and
/// keeps only ascii alphanumerics, so `"Café 42 Ltda."` becomes
/// `"cafe42ltda"`. The result is empty when no usable characters remain.
pub fn derive_instance_name(display_name: &str) -> String {
    display_name
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

fn fold_diacritic(ch: char) -> char {
    match ch {
        'à'..='å' => 'a',
        'è'..='ë' => 'e',
        'ì'..='ï' => 'i',
        'ò'..='ö' => 'o',
        'ù'..='ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}
