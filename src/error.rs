use thiserror::Error;

use crate::{gateway::GatewayError, store::StoreError};

/// Failure states surfaced by connection lifecycle operations.
///
/// Component-local failures (pairing fetch errors, malformed payloads,
/// persistence write errors) are absorbed and logged at their component
/// boundary; callers only ever see the variants below.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No instance record exists for the tenant. Non-retryable.
    #[error("no instance configured for tenant")]
    NotConfigured,
    /// The display name folds down to an empty instance name.
    #[error("display name yields an empty instance name")]
    InvalidName,
    /// Send attempted while the instance is not connected.
    #[error("instance is not connected")]
    NotConnected,
    /// Channel retries are spent; a manual reconnect is required.
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
    /// Gateway REST call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Persistence API call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The runner task for this instance is gone.
    #[error("instance command channel closed")]
    CommandChannelClosed,
}
