mod common;

use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use common::gateway_mock::{INSTANCE, TENANT, sample_image_data};
use evolink::{
    Event,
    diagnostics::ConnectionLog,
    instance::status::{ConnectionState, InstanceStatus, StatusTracker},
    store::{ConnectionPatch, memory::MemoryInstanceStore},
};

struct Fixture {
    tracker: StatusTracker,
    store: MemoryInstanceStore,
    events: broadcast::Receiver<Event>,
    log: ConnectionLog,
}

fn fixture() -> Fixture {
    let store = MemoryInstanceStore::new();
    let (event_tx, events) = broadcast::channel(32);
    let log = ConnectionLog::new();
    let tracker = StatusTracker::new(
        TENANT.to_owned(),
        INSTANCE.to_owned(),
        Arc::new(RwLock::new(InstanceStatus::default())),
        Arc::new(store.clone()),
        event_tx,
        log.clone(),
    );
    Fixture {
        tracker,
        store,
        events,
        log,
    }
}

#[tokio::test]
async fn full_lifecycle_walks_every_state() -> anyhow::Result<()> {
    let mut fx = fixture();

    assert!(fx.tracker.mark_connecting().await);
    assert_eq!(fx.tracker.state().await, ConnectionState::Connecting);

    assert!(fx.tracker.mark_waiting_pairing().await);
    assert_eq!(fx.tracker.state().await, ConnectionState::WaitingPairing);

    assert!(
        fx.tracker
            .mark_connected("5511999999999".to_owned(), Some("remote-1".to_owned()))
            .await
    );
    let snapshot = fx.tracker.snapshot().await;
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.phone.as_deref(), Some("5511999999999"));
    assert_eq!(snapshot.remote_instance_id.as_deref(), Some("remote-1"));

    for expected in [
        ConnectionState::Connecting,
        ConnectionState::WaitingPairing,
        ConnectionState::Connected,
    ] {
        let event = fx.events.recv().await?;
        assert_eq!(
            event,
            Event::StatusChanged {
                instance_name: INSTANCE.to_owned(),
                state: expected,
            }
        );
    }
    assert_eq!(
        fx.events.recv().await?,
        Event::Connected {
            instance_name: INSTANCE.to_owned(),
            phone: "5511999999999".to_owned(),
        }
    );
    Ok(())
}

#[tokio::test]
async fn connecting_is_rejected_unless_disconnected() {
    let fx = fixture();

    assert!(fx.tracker.mark_connecting().await);
    assert!(!fx.tracker.mark_connecting().await);
    assert_eq!(fx.tracker.state().await, ConnectionState::Connecting);
}

#[tokio::test]
async fn connected_requires_waiting_pairing() -> anyhow::Result<()> {
    let fx = fixture();

    assert!(
        !fx.tracker
            .mark_connected("5511999999999".to_owned(), None)
            .await
    );
    assert_eq!(fx.tracker.state().await, ConnectionState::Disconnected);
    // An ignored transition persists nothing.
    assert!(fx.store.applied_patches().await.is_empty());
    // It does leave a diagnostic behind.
    assert!(!fx.log.snapshot().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn waiting_pairing_is_idempotent() {
    let fx = fixture();

    assert!(fx.tracker.mark_connecting().await);
    assert!(fx.tracker.mark_waiting_pairing().await);
    assert!(fx.tracker.mark_waiting_pairing().await);
    assert_eq!(fx.tracker.state().await, ConnectionState::WaitingPairing);
}

#[tokio::test]
async fn connecting_persists_exactly_one_patch() -> anyhow::Result<()> {
    let fx = fixture();

    fx.tracker.mark_connecting().await;
    fx.tracker.mark_waiting_pairing().await;
    fx.tracker
        .mark_connected("5511999999999".to_owned(), Some("remote-1".to_owned()))
        .await;

    let patches = fx.store.applied_patches().await;
    assert_eq!(
        patches,
        vec![(
            TENANT.to_owned(),
            ConnectionPatch::connected("5511999999999".to_owned(), Some("remote-1".to_owned())),
        )]
    );
    Ok(())
}

#[tokio::test]
async fn disconnect_clears_session_and_patches_once() -> anyhow::Result<()> {
    let fx = fixture();

    fx.tracker.mark_connecting().await;
    fx.tracker.mark_waiting_pairing().await;
    fx.tracker
        .mark_connected("5511999999999".to_owned(), None)
        .await;
    fx.tracker.mark_disconnected("session closed").await;

    let snapshot = fx.tracker.snapshot().await;
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.phone, None);
    assert_eq!(snapshot.remote_instance_id, None);
    assert_eq!(snapshot.pairing.image_data, None);
    assert_eq!(snapshot.last_error.as_deref(), Some("session closed"));

    let patches = fx.store.applied_patches().await;
    assert_eq!(patches.len(), 2);
    assert_eq!(patches[1].1, ConnectionPatch::disconnected());
    Ok(())
}

#[tokio::test]
async fn disconnect_before_binding_skips_the_store() {
    let fx = fixture();

    fx.tracker.mark_connecting().await;
    fx.tracker.mark_waiting_pairing().await;
    fx.tracker.mark_disconnected("user cancelled").await;

    assert_eq!(fx.tracker.state().await, ConnectionState::Disconnected);
    // No session was ever bound, so there is nothing to clear remotely.
    assert!(fx.store.applied_patches().await.is_empty());
}

#[tokio::test]
async fn artifact_accepted_only_while_pairing() -> anyhow::Result<()> {
    let mut fx = fixture();

    // Disconnected: a late fetch result must not resurrect the artifact.
    assert!(!fx.tracker.set_pairing_artifact(sample_image_data()).await);
    assert_eq!(fx.tracker.snapshot().await.pairing.image_data, None);

    fx.tracker.mark_connecting().await;
    assert!(fx.tracker.set_pairing_artifact(sample_image_data()).await);

    fx.tracker.mark_waiting_pairing().await;
    assert!(fx.tracker.set_pairing_artifact(sample_image_data()).await);

    let snapshot = fx.tracker.snapshot().await;
    assert_eq!(snapshot.pairing.image_data, Some(sample_image_data()));
    assert_eq!(snapshot.pairing.expires_in_seconds, 30);

    let update = common::gateway_mock::wait_for_event(&mut fx.events, |event| {
        matches!(event, Event::PairingUpdated { .. })
    })
    .await?;
    assert_eq!(
        update,
        Event::PairingUpdated {
            instance_name: INSTANCE.to_owned(),
            image_data: sample_image_data(),
        }
    );

    fx.tracker
        .mark_connected("5511999999999".to_owned(), None)
        .await;
    assert!(!fx.tracker.set_pairing_artifact(sample_image_data()).await);
    assert_eq!(fx.tracker.snapshot().await.pairing.image_data, None);
    Ok(())
}

#[tokio::test]
async fn countdown_ticks_down_and_saturates() {
    let fx = fixture();

    fx.tracker.mark_connecting().await;
    fx.tracker.set_pairing_artifact(sample_image_data()).await;
    assert_eq!(fx.tracker.snapshot().await.pairing.expires_in_seconds, 30);

    fx.tracker.tick_pairing_countdown().await;
    fx.tracker.tick_pairing_countdown().await;
    assert_eq!(fx.tracker.snapshot().await.pairing.expires_in_seconds, 28);

    for _ in 0..40 {
        fx.tracker.tick_pairing_countdown().await;
    }
    assert_eq!(fx.tracker.snapshot().await.pairing.expires_in_seconds, 0);
}

#[tokio::test]
async fn refreshed_artifact_resets_the_countdown() {
    let fx = fixture();

    fx.tracker.mark_connecting().await;
    fx.tracker.set_pairing_artifact(sample_image_data()).await;
    fx.tracker.tick_pairing_countdown().await;
    assert_eq!(fx.tracker.snapshot().await.pairing.expires_in_seconds, 29);

    fx.tracker.set_pairing_artifact(sample_image_data()).await;
    assert_eq!(fx.tracker.snapshot().await.pairing.expires_in_seconds, 30);
}
