use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{
    channel::{
        self, ChannelConfig, ChannelHandle, ChannelNotice, GatewayEvent, GatewayState,
        StatusUpdate, event::phone_from_jid,
    },
    diagnostics::{ConnectionLog, Severity},
    error::ConnectError,
    gateway::{GatewayApi, GatewayError},
    instance::{
        handle::InstanceCommand,
        status::{ConnectionState, StatusTracker},
    },
    pairing::{self, ParsedArtifact},
};

/// Everything a runner task needs besides its channels.
pub(crate) struct RunnerContext {
    pub instance_name: String,
    pub gateway: Arc<dyn GatewayApi>,
    pub channel_config: ChannelConfig,
    pub pairing_refresh: Duration,
    pub log: ConnectionLog,
}

/// Result of one pairing artifact fetch, tagged with the session it
/// belongs to. Outcomes from a dead session are discarded.
struct FetchOutcome {
    epoch: u64,
    result: Result<Value, GatewayError>,
}

#[derive(Default)]
struct RunnerSession {
    channel: Option<ChannelHandle>,
    channel_rx: Option<mpsc::Receiver<ChannelNotice>>,
    /// Bumped on every connect and disconnect; the stale-fetch guard.
    epoch: u64,
    refresh: Option<Interval>,
    countdown: Option<Interval>,
}

enum Wake {
    Command(Option<InstanceCommand>),
    Notice(Option<ChannelNotice>),
    Fetch(FetchOutcome),
    RefreshTick,
    CountdownTick,
}

/// Main task loop for a single instance: sequences the event channel, the
/// pairing refresh loop and the status tracker.
pub(crate) async fn run(
    ctx: RunnerContext,
    tracker: StatusTracker,
    mut command_rx: mpsc::Receiver<InstanceCommand>,
) {
    let (fetch_tx, mut fetch_rx) = mpsc::channel::<FetchOutcome>(8);
    let mut session = RunnerSession::default();

    loop {
        let wake = {
            let RunnerSession {
                channel_rx,
                refresh,
                countdown,
                ..
            } = &mut session;
            tokio::select! {
                maybe_command = command_rx.recv() => Wake::Command(maybe_command),
                maybe_notice = recv_notice(channel_rx) => Wake::Notice(maybe_notice),
                Some(outcome) = fetch_rx.recv() => Wake::Fetch(outcome),
                _ = tick(refresh) => Wake::RefreshTick,
                _ = tick(countdown) => Wake::CountdownTick,
            }
        };

        match wake {
            Wake::Command(None) => break,
            Wake::Command(Some(command)) => {
                if !handle_command(&ctx, &tracker, &mut session, &fetch_tx, command).await {
                    break;
                }
            }
            Wake::Notice(Some(notice)) => {
                handle_notice(&ctx, &tracker, &mut session, notice).await;
            }
            Wake::Notice(None) => {
                // Channel task ended; nothing more will arrive from it.
                session.channel_rx = None;
            }
            Wake::Fetch(outcome) => {
                apply_fetch_outcome(&ctx, &tracker, &session, outcome).await;
            }
            Wake::RefreshTick => {
                spawn_pairing_fetch(&ctx, &fetch_tx, session.epoch);
            }
            Wake::CountdownTick => {
                tracker.tick_pairing_countdown().await;
            }
        }
    }

    teardown(&mut session);
}

async fn recv_notice(slot: &mut Option<mpsc::Receiver<ChannelNotice>>) -> Option<ChannelNotice> {
    match slot {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Returns false when the runner should stop.
async fn handle_command(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    session: &mut RunnerSession,
    fetch_tx: &mpsc::Sender<FetchOutcome>,
    command: InstanceCommand,
) -> bool {
    match command {
        InstanceCommand::Connect => {
            start_connect(ctx, tracker, session, fetch_tx).await;
            true
        }
        InstanceCommand::Disconnect => {
            disconnect(ctx, tracker, session, "manual disconnect", true).await;
            true
        }
        InstanceCommand::RegeneratePairing => {
            match tracker.state().await {
                ConnectionState::Disconnected => {
                    start_connect(ctx, tracker, session, fetch_tx).await;
                }
                ConnectionState::Connecting | ConnectionState::WaitingPairing => {
                    spawn_pairing_fetch(ctx, fetch_tx, session.epoch);
                }
                ConnectionState::Connected => {
                    tracker
                        .note_failure("pairing regeneration ignored while connected")
                        .await;
                }
            }
            true
        }
        InstanceCommand::SendMessage { phone, text, reply } => {
            let result = send_text(ctx, tracker, &phone, &text).await;
            let _ = reply.send(result);
            true
        }
        InstanceCommand::Shutdown => false,
    }
}

/// Provisions the gateway instance, opens the event channel and starts the
/// pairing refresh loop, in that order. The channel open is always issued
/// before the first artifact request so no pairing push can be missed.
async fn start_connect(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    session: &mut RunnerSession,
    fetch_tx: &mpsc::Sender<FetchOutcome>,
) {
    if !tracker.mark_connecting().await {
        return;
    }
    session.epoch = session.epoch.wrapping_add(1);

    // Restart is cheap when the instance already exists on the gateway;
    // create is the recovery path when it does not.
    match ctx.gateway.restart_instance(&ctx.instance_name).await {
        Ok(_) => {
            ctx.log
                .push(Severity::Info, "gateway instance restarted")
                .await;
        }
        Err(restart_error) => {
            tracing::warn!(
                instance = %ctx.instance_name,
                error = %restart_error,
                "restart failed; provisioning a fresh gateway instance"
            );
            match ctx.gateway.create_instance(&ctx.instance_name).await {
                Ok(_) => {
                    ctx.log
                        .push(Severity::Success, "gateway instance created")
                        .await;
                }
                Err(create_error) => {
                    tracker
                        .mark_disconnected(&format!("gateway provisioning failed: {create_error}"))
                        .await;
                    return;
                }
            }
        }
    }

    open_channel(ctx, session);
    start_pairing_loop(session, ctx.pairing_refresh);
    spawn_pairing_fetch(ctx, fetch_tx, session.epoch);
}

fn open_channel(ctx: &RunnerContext, session: &mut RunnerSession) {
    let (notice_tx, notice_rx) = mpsc::channel(64);
    // Replacing the handle drops the previous one, which closes the old
    // channel before the new instance can race it.
    session.channel = Some(channel::spawn(
        ctx.channel_config.clone(),
        ctx.instance_name.clone(),
        notice_tx,
    ));
    session.channel_rx = Some(notice_rx);
}

async fn handle_notice(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    session: &mut RunnerSession,
    notice: ChannelNotice,
) {
    match notice {
        ChannelNotice::Open => {
            ctx.log.push(Severity::Success, "event channel open").await;
            probe_remote_session(ctx, tracker, session).await;
        }
        ChannelNotice::Closed { reason } => {
            ctx.log
                .push(Severity::Warning, format!("event channel closed: {reason}"))
                .await;
        }
        ChannelNotice::ReconnectScheduled {
            attempt,
            delay_secs,
        } => {
            ctx.log
                .push(
                    Severity::Info,
                    format!("reconnect {attempt} scheduled in {delay_secs}s"),
                )
                .await;
            tracker.emit_reconnect_scheduled(attempt, delay_secs);
        }
        ChannelNotice::Exhausted => {
            tracing::error!(instance = %ctx.instance_name, "reconnect attempts exhausted");
            ctx.log
                .push(Severity::Error, "reconnect attempts exhausted")
                .await;
            tracker.emit_reconnect_exhausted();
            stop_session(session);
            tracker
                .mark_disconnected(&ConnectError::ReconnectExhausted.to_string())
                .await;
        }
        ChannelNotice::Event(GatewayEvent::Status(update)) => {
            apply_status_update(ctx, tracker, session, update).await;
        }
        ChannelNotice::Event(GatewayEvent::Pairing(payload)) => {
            apply_pairing_payload(ctx, tracker, &payload).await;
        }
        ChannelNotice::Event(GatewayEvent::Message(message)) => {
            ctx.log
                .push(Severity::Info, format!("message from {}", message.from))
                .await;
            tracker.emit_message_received(message.from, message.text);
        }
    }
}

/// Checks the gateway for an already-bound session right after the channel
/// opens; reaches waiting_pairing (and connected, when a session exists)
/// without waiting for a push.
async fn probe_remote_session(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    session: &mut RunnerSession,
) {
    match ctx.gateway.fetch_status(&ctx.instance_name).await {
        Ok(remote) => {
            let bound_phone = remote
                .state
                .as_deref()
                .and_then(channel::event::normalize_state)
                .filter(|state| *state == GatewayState::Open)
                .and_then(|_| remote.owner_jid.as_deref())
                .map(phone_from_jid)
                .filter(|phone| !phone.is_empty());

            tracker.mark_waiting_pairing().await;
            if let Some(phone) = bound_phone {
                if tracker.mark_connected(phone, remote.instance_id).await {
                    stop_pairing_loop(session);
                }
            }
        }
        Err(error) => {
            tracing::warn!(
                instance = %ctx.instance_name,
                error = %error,
                "status probe failed after channel open"
            );
            tracker.mark_waiting_pairing().await;
        }
    }
}

/// Applies a pushed status transition in receipt order.
async fn apply_status_update(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    session: &mut RunnerSession,
    update: StatusUpdate,
) {
    match update.state {
        GatewayState::Open => {
            let Some(phone) = update.phone else {
                tracker
                    .note_failure("open status event without a phone ignored")
                    .await;
                return;
            };
            if tracker.mark_connected(phone, update.remote_instance_id).await {
                stop_pairing_loop(session);
            }
        }
        GatewayState::Closed => {
            if tracker.state().await == ConnectionState::Connected {
                disconnect(ctx, tracker, session, "session closed by gateway", false).await;
            } else {
                tracker
                    .note_failure("close status event ignored; no session bound")
                    .await;
            }
        }
        GatewayState::Connecting => {
            // The gateway reports connecting while the pairing screen is up.
            tracker.mark_waiting_pairing().await;
        }
    }
}

async fn apply_fetch_outcome(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    session: &RunnerSession,
    outcome: FetchOutcome,
) {
    if outcome.epoch != session.epoch {
        tracing::debug!(instance = %ctx.instance_name, "stale pairing fetch discarded");
        return;
    }

    match outcome.result {
        Ok(payload) => {
            // A pairing payload is the gateway confirming the instance
            // exists with no bound session.
            tracker.mark_waiting_pairing().await;
            apply_pairing_payload(ctx, tracker, &payload).await;
        }
        Err(error) => {
            tracing::warn!(
                instance = %ctx.instance_name,
                error = %error,
                transient = error.is_transient(),
                "pairing fetch failed; next refresh will retry"
            );
            tracker
                .note_failure(&format!("pairing fetch failed: {error}"))
                .await;
        }
    }
}

async fn apply_pairing_payload(ctx: &RunnerContext, tracker: &StatusTracker, payload: &Value) {
    match pairing::parse_artifact(payload) {
        ParsedArtifact::Recognized(image_data) => {
            tracker.set_pairing_artifact(image_data).await;
        }
        ParsedArtifact::Unrecognized => {
            tracing::warn!(instance = %ctx.instance_name, "pairing payload failed validation");
            tracker
                .note_failure("pairing payload failed validation")
                .await;
        }
    }
}

async fn disconnect(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    session: &mut RunnerSession,
    reason: &str,
    logout_gateway: bool,
) {
    if logout_gateway {
        if let Err(error) = ctx.gateway.logout_instance(&ctx.instance_name).await {
            tracing::warn!(instance = %ctx.instance_name, error = %error, "gateway logout failed");
            ctx.log
                .push(Severity::Warning, format!("gateway logout failed: {error}"))
                .await;
        }
    }

    stop_session(session);
    tracker.mark_disconnected(reason).await;
}

async fn send_text(
    ctx: &RunnerContext,
    tracker: &StatusTracker,
    phone: &str,
    text: &str,
) -> Result<(), ConnectError> {
    if tracker.state().await != ConnectionState::Connected {
        return Err(ConnectError::NotConnected);
    }

    // Outbound sends go over REST; the event channel is receive-only.
    ctx.gateway
        .send_text(&ctx.instance_name, phone, text)
        .await?;
    Ok(())
}

fn spawn_pairing_fetch(ctx: &RunnerContext, fetch_tx: &mpsc::Sender<FetchOutcome>, epoch: u64) {
    let gateway = ctx.gateway.clone();
    let instance_name = ctx.instance_name.clone();
    let fetch_tx = fetch_tx.clone();
    tokio::spawn(async move {
        let result = gateway.connect_instance(&instance_name).await;
        let _ = fetch_tx.send(FetchOutcome { epoch, result }).await;
    });
}

fn start_pairing_loop(session: &mut RunnerSession, refresh: Duration) {
    let mut refresh_interval = tokio::time::interval_at(Instant::now() + refresh, refresh);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    session.refresh = Some(refresh_interval);

    let second = Duration::from_secs(1);
    let mut countdown_interval = tokio::time::interval_at(Instant::now() + second, second);
    countdown_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    session.countdown = Some(countdown_interval);
}

fn stop_pairing_loop(session: &mut RunnerSession) {
    session.refresh = None;
    session.countdown = None;
}

/// Cancels every timer and the channel, and invalidates in-flight fetches.
fn stop_session(session: &mut RunnerSession) {
    stop_pairing_loop(session);
    if let Some(channel) = session.channel.take() {
        channel.close();
    }
    session.channel_rx = None;
    session.epoch = session.epoch.wrapping_add(1);
}

fn teardown(session: &mut RunnerSession) {
    stop_session(session);
}
