use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

use crate::{
    diagnostics::{ConnectionLog, Severity},
    events::Event,
    pairing::{PAIRING_TTL_SECONDS, PairingStatus},
    store::{ConnectionPatch, InstanceStore},
};

/// Connection lifecycle state of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    WaitingPairing,
    Connected,
}

impl ConnectionState {
    /// Stable string representation of a connection state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::WaitingPairing => "waiting_pairing",
            Self::Connected => "connected",
        }
    }
}

/// Status snapshot shared with handles; mutated only by [`StatusTracker`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub state: ConnectionState,
    /// Bound phone number; populated only while connected.
    pub phone: Option<String>,
    /// Opaque gateway-side instance id; cleared on disconnect.
    pub remote_instance_id: Option<String>,
    pub pairing: PairingStatus,
    pub last_error: Option<String>,
}

/// Sole authority over `InstanceStatus` and its persistence side effects.
///
/// Transitions that are not valid from the current state are logged and
/// ignored. Persistence write failures are logged and never roll the
/// in-memory transition back; responsive state wins over strict
/// consistency here.
pub struct StatusTracker {
    tenant_id: String,
    instance_name: String,
    status: Arc<RwLock<InstanceStatus>>,
    store: Arc<dyn InstanceStore>,
    event_tx: broadcast::Sender<Event>,
    log: ConnectionLog,
}

impl StatusTracker {
    pub fn new(
        tenant_id: String,
        instance_name: String,
        status: Arc<RwLock<InstanceStatus>>,
        store: Arc<dyn InstanceStore>,
        event_tx: broadcast::Sender<Event>,
        log: ConnectionLog,
    ) -> Self {
        Self {
            tenant_id,
            instance_name,
            status,
            store,
            event_tx,
            log,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        self.status.read().await.state
    }

    /// Full status snapshot.
    pub async fn snapshot(&self) -> InstanceStatus {
        self.status.read().await.clone()
    }

    /// disconnected -> connecting, on an explicit connect action.
    pub async fn mark_connecting(&self) -> bool {
        {
            let mut guard = self.status.write().await;
            if guard.state != ConnectionState::Disconnected {
                drop(guard);
                self.rejected("connecting").await;
                return false;
            }
            guard.state = ConnectionState::Connecting;
            guard.last_error = None;
        }

        self.log.push(Severity::Info, "connecting to gateway").await;
        self.emit_state(ConnectionState::Connecting);
        true
    }

    /// connecting -> waiting_pairing, once the gateway confirms the
    /// instance exists with no bound session.
    pub async fn mark_waiting_pairing(&self) -> bool {
        {
            let mut guard = self.status.write().await;
            match guard.state {
                ConnectionState::Connecting => guard.state = ConnectionState::WaitingPairing,
                ConnectionState::WaitingPairing => return true,
                _ => {
                    drop(guard);
                    self.rejected("waiting_pairing").await;
                    return false;
                }
            }
        }

        self.log
            .push(Severity::Info, "waiting for pairing scan")
            .await;
        self.emit_state(ConnectionState::WaitingPairing);
        true
    }

    /// waiting_pairing -> connected. Clears the pairing artifact and issues
    /// exactly one persistence patch carrying the phone and remote id.
    pub async fn mark_connected(&self, phone: String, remote_instance_id: Option<String>) -> bool {
        {
            let mut guard = self.status.write().await;
            if guard.state != ConnectionState::WaitingPairing {
                drop(guard);
                self.rejected("connected").await;
                return false;
            }
            guard.state = ConnectionState::Connected;
            guard.phone = Some(phone.clone());
            guard.remote_instance_id = remote_instance_id.clone();
            guard.pairing = PairingStatus::default();
            guard.last_error = None;
        }

        tracing::info!(instance = %self.instance_name, phone = %phone, "instance connected");
        self.log
            .push(Severity::Success, format!("connected as {phone}"))
            .await;
        self.emit_state(ConnectionState::Connected);
        let _ = self.event_tx.send(Event::Connected {
            instance_name: self.instance_name.clone(),
            phone: phone.clone(),
        });

        self.persist(ConnectionPatch::connected(phone, remote_instance_id))
            .await;
        true
    }

    /// any -> disconnected. Clears phone, remote id and the pairing
    /// artifact; the store is patched only when a session was bound.
    pub async fn mark_disconnected(&self, reason: &str) {
        let was_connected;
        {
            let mut guard = self.status.write().await;
            was_connected = guard.state == ConnectionState::Connected;
            guard.state = ConnectionState::Disconnected;
            guard.phone = None;
            guard.remote_instance_id = None;
            guard.pairing = PairingStatus::default();
            guard.last_error = if reason.is_empty() {
                None
            } else {
                Some(reason.to_owned())
            };
        }

        tracing::info!(instance = %self.instance_name, reason = %reason, "instance disconnected");
        self.log
            .push(Severity::Warning, format!("disconnected: {reason}"))
            .await;
        self.emit_state(ConnectionState::Disconnected);
        let _ = self.event_tx.send(Event::Disconnected {
            instance_name: self.instance_name.clone(),
            reason: reason.to_owned(),
        });

        if was_connected {
            self.persist(ConnectionPatch::disconnected()).await;
        }
    }

    /// Stores a fresh artifact and resets the countdown. Refused once the
    /// instance is connected or disconnected, which discards late fetches.
    pub async fn set_pairing_artifact(&self, image_data: String) -> bool {
        {
            let mut guard = self.status.write().await;
            if !matches!(
                guard.state,
                ConnectionState::Connecting | ConnectionState::WaitingPairing
            ) {
                tracing::debug!(instance = %self.instance_name, "pairing artifact discarded; instance not pairing");
                return false;
            }
            guard.pairing.image_data = Some(image_data.clone());
            guard.pairing.expires_in_seconds = PAIRING_TTL_SECONDS;
        }

        self.log
            .push(Severity::Info, "pairing artifact refreshed")
            .await;
        let _ = self.event_tx.send(Event::PairingUpdated {
            instance_name: self.instance_name.clone(),
            image_data,
        });
        true
    }

    /// Counts the user-facing countdown down by one second.
    pub async fn tick_pairing_countdown(&self) {
        let mut guard = self.status.write().await;
        guard.pairing.expires_in_seconds = guard.pairing.expires_in_seconds.saturating_sub(1);
    }

    /// Records a non-fatal failure without changing state.
    pub async fn note_failure(&self, message: &str) {
        self.log.push(Severity::Warning, message.to_owned()).await;
    }

    pub fn emit_reconnect_scheduled(&self, attempt: u32, delay_secs: u64) {
        let _ = self.event_tx.send(Event::ReconnectScheduled {
            instance_name: self.instance_name.clone(),
            attempt,
            delay_secs,
        });
    }

    pub fn emit_reconnect_exhausted(&self) {
        let _ = self.event_tx.send(Event::ReconnectExhausted {
            instance_name: self.instance_name.clone(),
        });
    }

    pub fn emit_message_received(&self, from: String, text: String) {
        let _ = self.event_tx.send(Event::MessageReceived {
            instance_name: self.instance_name.clone(),
            from,
            text,
        });
    }

    fn emit_state(&self, state: ConnectionState) {
        let _ = self.event_tx.send(Event::StatusChanged {
            instance_name: self.instance_name.clone(),
            state,
        });
    }

    async fn rejected(&self, target: &str) {
        let current = self.state().await;
        tracing::warn!(
            instance = %self.instance_name,
            current = current.as_str(),
            target,
            "ignoring out-of-order status transition"
        );
        self.log
            .push(
                Severity::Warning,
                format!(
                    "ignored {target} transition while {current}",
                    current = current.as_str()
                ),
            )
            .await;
    }

    async fn persist(&self, patch: ConnectionPatch) {
        if let Err(error) = self.store.patch(&self.tenant_id, &patch).await {
            tracing::warn!(
                instance = %self.instance_name,
                error = %error,
                "persistence patch failed; keeping in-memory state"
            );
            self.log
                .push(
                    Severity::Warning,
                    format!("persistence patch failed: {error}"),
                )
                .await;
        }
    }
}
