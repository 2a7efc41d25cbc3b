#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, Semaphore, broadcast};

use evolink::{
    Config, Event,
    gateway::{GatewayApi, GatewayError, GatewayStatus},
    instance::InstanceManager,
    store::{ConnectionPatch, InstanceRecord, InstanceStore, memory::MemoryInstanceStore},
};

pub const TENANT: &str = "tenant1";
pub const INSTANCE: &str = "alpha";

/// Scripted gateway double; records every call in order.
pub struct MockGateway {
    calls: Mutex<Vec<String>>,
    fail_restart: AtomicBool,
    connect_payload: Mutex<Value>,
    connect_gate: Option<Arc<Semaphore>>,
    status: Mutex<GatewayStatus>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_restart: AtomicBool::new(false),
            connect_payload: Mutex::new(json!({ "base64": sample_payload() })),
            connect_gate: None,
            status: Mutex::new(GatewayStatus::default()),
        })
    }

    /// Like [`MockGateway::new`], but `connect_instance` blocks until the
    /// semaphore hands out a permit.
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_restart: AtomicBool::new(false),
            connect_payload: Mutex::new(json!({ "base64": sample_payload() })),
            connect_gate: Some(gate),
            status: Mutex::new(GatewayStatus::default()),
        })
    }

    pub fn fail_restart(&self) {
        self.fail_restart.store(true, Ordering::SeqCst);
    }

    pub async fn set_connect_payload(&self, payload: Value) {
        *self.connect_payload.lock().await = payload;
    }

    pub async fn set_status(&self, status: GatewayStatus) {
        *self.status.lock().await = status;
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.as_str() == name)
            .count()
    }

    async fn record(&self, name: &str) {
        self.calls.lock().await.push(name.to_owned());
    }
}

#[async_trait]
impl GatewayApi for MockGateway {
    async fn create_instance(&self, _instance_name: &str) -> Result<Value, GatewayError> {
        self.record("create").await;
        Ok(json!({}))
    }

    async fn restart_instance(&self, _instance_name: &str) -> Result<Value, GatewayError> {
        self.record("restart").await;
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 404,
                body: "instance not found".to_owned(),
            });
        }
        Ok(json!({}))
    }

    async fn logout_instance(&self, _instance_name: &str) -> Result<Value, GatewayError> {
        self.record("logout").await;
        Ok(json!({}))
    }

    async fn connect_instance(&self, _instance_name: &str) -> Result<Value, GatewayError> {
        self.record("connect").await;
        if let Some(gate) = &self.connect_gate {
            let permit = gate.acquire().await.map_err(|_| GatewayError::Status {
                status: 503,
                body: "gate closed".to_owned(),
            })?;
            permit.forget();
        }
        Ok(self.connect_payload.lock().await.clone())
    }

    async fn send_text(
        &self,
        _instance_name: &str,
        _phone: &str,
        _text: &str,
    ) -> Result<Value, GatewayError> {
        self.record("send_text").await;
        Ok(json!({}))
    }

    async fn fetch_status(&self, _instance_name: &str) -> Result<GatewayStatus, GatewayError> {
        self.record("fetch_status").await;
        Ok(self.status.lock().await.clone())
    }
}

/// A base64 string long enough to pass artifact validation.
pub fn sample_payload() -> String {
    "A".repeat(100)
}

/// The data URI the sample payload normalizes to.
pub fn sample_image_data() -> String {
    format!("data:image/png;base64,{}", sample_payload())
}

pub struct TestRig {
    pub manager: InstanceManager,
    pub gateway: Arc<MockGateway>,
    pub store: MemoryInstanceStore,
}

/// Manager over a mock gateway and an in-memory store pre-seeded with one
/// tenant record.
pub async fn rig(ws_base_url: &str, gateway: Arc<MockGateway>) -> anyhow::Result<TestRig> {
    rig_with_config(gateway, test_config(ws_base_url)).await
}

pub async fn rig_with_config(
    gateway: Arc<MockGateway>,
    config: Config,
) -> anyhow::Result<TestRig> {
    let store = MemoryInstanceStore::new();
    store
        .insert(&InstanceRecord {
            tenant_id: TENANT.to_owned(),
            instance_name: INSTANCE.to_owned(),
            phone: None,
            remote_instance_id: None,
            connected: false,
        })
        .await?;

    let manager = InstanceManager::new(gateway.clone(), Arc::new(store.clone()), Arc::new(config));

    Ok(TestRig {
        manager,
        gateway,
        store,
    })
}

pub fn test_config(ws_base_url: &str) -> Config {
    Config {
        gateway_base_url: "http://127.0.0.1:9".to_owned(),
        gateway_api_key: "test-key".to_owned(),
        gateway_ws_url: ws_base_url.to_owned(),
        store_base_url: "http://127.0.0.1:9".to_owned(),
        store_api_key: String::new(),
        pairing_refresh: Duration::from_secs(30),
        reconnect_delay: Duration::from_secs(5),
        max_reconnect_attempts: 5,
    }
}

/// Polls the store until at least `count` patches landed. Events fire
/// just before the write, so tests wait here instead of racing it.
pub async fn wait_for_patches(
    store: &MemoryInstanceStore,
    count: usize,
) -> anyhow::Result<Vec<(String, ConnectionPatch)>> {
    for _ in 0..200 {
        let patches = store.applied_patches().await;
        if patches.len() >= count {
            return Ok(patches);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("store never saw {count} patches")
}

/// Receives events until one matches, failing after a timeout.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    mut matches: F,
) -> anyhow::Result<Event>
where
    F: FnMut(&Event) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await??;
        if matches(&event) {
            return Ok(event);
        }
    }
}
