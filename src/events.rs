use serde::{Deserialize, Serialize};

use crate::instance::status::ConnectionState;

/// Events broadcast to handle subscribers as the connection lifecycle moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Connection state changed.
    StatusChanged {
        instance_name: String,
        state: ConnectionState,
    },
    /// A fresh pairing artifact is available for scanning.
    PairingUpdated {
        instance_name: String,
        image_data: String,
    },
    /// Instance bound to a phone and entered connected state.
    Connected {
        instance_name: String,
        phone: String,
    },
    /// Instance left connected state.
    Disconnected {
        instance_name: String,
        reason: String,
    },
    /// Channel reconnect scheduled after a drop.
    ReconnectScheduled {
        instance_name: String,
        attempt: u32,
        delay_secs: u64,
    },
    /// Channel retries are spent; manual reconnect required.
    ReconnectExhausted { instance_name: String },
    /// Inbound message pushed by the gateway.
    MessageReceived {
        instance_name: String,
        from: String,
        text: String,
    },
}

impl Event {
    /// Returns a stable event-type label.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::PairingUpdated { .. } => "pairing_updated",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
            Self::MessageReceived { .. } => "message_received",
        }
    }
}
