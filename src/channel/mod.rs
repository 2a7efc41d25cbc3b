pub mod event;

pub use event::{
    GatewayEvent, GatewayState, InboundMessage, ParsedFrame, StatusUpdate, parse_frame,
};

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Fixed delay between reconnect attempts. No jitter, no backoff.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Consecutive failures tolerated before the channel gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Connection parameters for one channel task.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub ws_base_url: String,
    pub api_key: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

/// Notices surfaced by the channel task to its owner, in receipt order.
#[derive(Debug)]
pub enum ChannelNotice {
    /// Socket is open and pumping frames.
    Open,
    /// Socket closed or errored; reason is best-effort.
    Closed { reason: String },
    /// A reconnect has been scheduled after a drop.
    ReconnectScheduled { attempt: u32, delay_secs: u64 },
    /// Retries are spent; the task has ended.
    Exhausted,
    /// A recognized gateway event arrived.
    Event(GatewayEvent),
}

/// Owner-side handle for one channel task.
///
/// Dropping the handle cancels the task, so replacing the handle for a new
/// instance name always tears the old channel down first.
pub struct ChannelHandle {
    outbound_tx: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Queues a payload for delivery.
    ///
    /// Returns false when the socket is not currently open; the payload is
    /// not queued and the caller decides whether to fall back to a REST call.
    pub fn send(&self, payload: &str) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        self.outbound_tx.send(payload.to_owned()).is_ok()
    }

    /// True while the socket is open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Tears the channel down and cancels any pending reconnect sleep.
    /// Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns the channel task for `instance_name` and returns its handle.
///
/// Notices flow to `notice_tx` in receipt order. The task ends on
/// cancellation or after retries are exhausted.
pub fn spawn(
    config: ChannelConfig,
    instance_name: String,
    notice_tx: mpsc::Sender<ChannelNotice>,
) -> ChannelHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();

    tokio::spawn(run(
        config,
        instance_name,
        notice_tx,
        outbound_rx,
        open.clone(),
        cancel.clone(),
    ));

    ChannelHandle {
        outbound_tx,
        open,
        cancel,
    }
}

async fn run(
    config: ChannelConfig,
    instance_name: String,
    notice_tx: mpsc::Sender<ChannelNotice>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let url = channel_url(&config.ws_base_url, &instance_name, &config.api_key);
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let connected = tokio::select! {
            result = connect_async(&url) => result,
            _ = cancel.cancelled() => break,
        };

        match connected {
            Ok((stream, _response)) => {
                attempts = 0;
                open.store(true, Ordering::Release);
                let _ = notice_tx.send(ChannelNotice::Open).await;

                let reason =
                    pump(stream, &instance_name, &notice_tx, &mut outbound_rx, &cancel).await;
                open.store(false, Ordering::Release);

                if cancel.is_cancelled() {
                    break;
                }
                tracing::warn!(instance = %instance_name, reason = %reason, "event channel dropped");
                let _ = notice_tx.send(ChannelNotice::Closed { reason }).await;
            }
            Err(error) => {
                tracing::warn!(instance = %instance_name, error = %error, "event channel connect failed");
                let _ = notice_tx
                    .send(ChannelNotice::Closed {
                        reason: error.to_string(),
                    })
                    .await;
            }
        }

        attempts = attempts.saturating_add(1);
        if attempts > config.max_reconnect_attempts {
            let _ = notice_tx.send(ChannelNotice::Exhausted).await;
            break;
        }

        let _ = notice_tx
            .send(ChannelNotice::ReconnectScheduled {
                attempt: attempts,
                delay_secs: config.reconnect_delay.as_secs(),
            })
            .await;
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    open.store(false, Ordering::Release);
}

/// Pumps one live socket until it closes; returns the close reason.
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    instance_name: &str,
    notice_tx: &mpsc::Sender<ChannelNotice>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> String {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return "closed_by_owner".to_owned();
            }
            maybe_outbound = outbound_rx.recv() => {
                let Some(payload) = maybe_outbound else {
                    return "owner_dropped".to_owned();
                };
                if let Err(error) = sink.send(Message::Text(payload.into())).await {
                    return format!("send_failed: {error}");
                }
            }
            maybe_frame = source.next() => {
                match maybe_frame {
                    Some(Ok(Message::Text(raw))) => {
                        match event::parse_frame(raw.as_str()) {
                            ParsedFrame::Recognized(gateway_event) => {
                                let _ = notice_tx.send(ChannelNotice::Event(gateway_event)).await;
                            }
                            ParsedFrame::Unrecognized => {
                                tracing::debug!(instance = %instance_name, "unrecognized channel frame dropped");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return frame
                            .map(|close| close.reason.to_string())
                            .filter(|reason| !reason.is_empty())
                            .unwrap_or_else(|| "closed_by_peer".to_owned());
                    }
                    // Pings are answered by the protocol layer on flush.
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return format!("transport_error: {error}"),
                    None => return "stream_ended".to_owned(),
                }
            }
        }
    }
}

fn channel_url(ws_base_url: &str, instance_name: &str, api_key: &str) -> String {
    let base = ws_base_url.trim_end_matches('/');
    format!("{base}/{instance_name}?apikey={api_key}")
}
