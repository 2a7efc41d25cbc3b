use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc, oneshot};

use crate::{
    diagnostics::ConnectionLog,
    error::ConnectError,
    events::Event,
    instance::status::{ConnectionState, InstanceStatus},
};

/// Commands accepted by an instance runner task.
#[derive(Debug)]
pub enum InstanceCommand {
    /// Starts the connect / pairing flow.
    Connect,
    /// Tears everything down and returns to disconnected.
    Disconnect,
    /// Requests a fresh pairing artifact immediately.
    RegeneratePairing,
    /// Sends a text through the gateway REST API.
    SendMessage {
        phone: String,
        text: String,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    /// Stops the runner task.
    Shutdown,
}

/// UI-facing handle for one tenant's connection manager.
#[derive(Clone)]
pub struct InstanceHandle {
    instance_name: String,
    command_tx: mpsc::Sender<InstanceCommand>,
    status: Arc<RwLock<InstanceStatus>>,
    event_tx: broadcast::Sender<Event>,
    log: ConnectionLog,
}

impl InstanceHandle {
    pub(crate) fn new(
        instance_name: String,
        command_tx: mpsc::Sender<InstanceCommand>,
        status: Arc<RwLock<InstanceStatus>>,
        event_tx: broadcast::Sender<Event>,
        log: ConnectionLog,
    ) -> Self {
        Self {
            instance_name,
            command_tx,
            status,
            event_tx,
            log,
        }
    }

    /// Derived gateway instance name.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Full status snapshot.
    pub async fn status(&self) -> InstanceStatus {
        self.status.read().await.clone()
    }

    /// Current lifecycle state.
    pub async fn connection_state(&self) -> ConnectionState {
        self.status.read().await.state
    }

    /// Current pairing artifact, when one is live.
    pub async fn pairing_image(&self) -> Option<String> {
        self.status.read().await.pairing.image_data.clone()
    }

    /// Seconds left before the pairing artifact refreshes.
    pub async fn pairing_countdown(&self) -> u32 {
        self.status.read().await.pairing.expires_in_seconds
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Read-only diagnostic feed for this instance.
    pub fn diagnostics(&self) -> &ConnectionLog {
        &self.log
    }

    /// Starts the connect / pairing flow.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.send_command(InstanceCommand::Connect).await
    }

    /// Disconnects and stops all pairing timers.
    pub async fn disconnect(&self) -> Result<(), ConnectError> {
        self.send_command(InstanceCommand::Disconnect).await
    }

    /// Requests a fresh pairing artifact out of cycle.
    pub async fn regenerate_pairing(&self) -> Result<(), ConnectError> {
        self.send_command(InstanceCommand::RegeneratePairing).await
    }

    /// Sends a text message through the gateway.
    ///
    /// Fails with [`ConnectError::NotConnected`] unless the instance is
    /// connected; the gateway is not called in that case.
    pub async fn send_message(&self, phone: &str, text: &str) -> Result<(), ConnectError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(InstanceCommand::SendMessage {
                phone: phone.to_owned(),
                text: text.to_owned(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ConnectError::CommandChannelClosed)?;
        reply_rx
            .await
            .map_err(|_| ConnectError::CommandChannelClosed)?
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ConnectError> {
        self.send_command(InstanceCommand::Shutdown).await
    }

    async fn send_command(&self, command: InstanceCommand) -> Result<(), ConnectError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ConnectError::CommandChannelClosed)
    }
}
