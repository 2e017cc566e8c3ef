use serde_json::json;

use tether_core::presence::{PeerPresence, SignalingNotification};
use tether_core::wire::ErrorReason;
use tether_services::SendEvent;

use crate::*;

#[tokio::test]
async fn test_status_follows_channel_lifecycle() -> Result<()> {
    let (alice, bob) = unopened_peers(transport(4, 1_000)).await;
    assert_eq!(alice.connector.status(), ConnectionStatus::Connecting);
    assert_eq!(bob.connector.status(), ConnectionStatus::Connecting);

    let mut alice_status = alice.connector.watch_status();
    let mut bob_status = bob.connector.watch_status();
    alice.channel.open();
    wait_for_status(&mut alice_status, ConnectionStatus::Connected).await?;
    wait_for_status(&mut bob_status, ConnectionStatus::Connected).await?;

    alice.connector.close().await;
    wait_for_status(&mut alice_status, ConnectionStatus::Disconnected).await?;
    wait_for_status(&mut bob_status, ConnectionStatus::Disconnected).await?;

    let err = bob.connector.send(&json!("too late")).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::NotConnected);
    Ok(())
}

#[tokio::test]
async fn test_close_is_observable_as_disconnecting() -> Result<()> {
    let (alice, _bob) = linked_peers(transport(4, 1_000)).await;
    let mut status = alice.connector.watch_status();
    wait_for_status(&mut status, ConnectionStatus::Connected).await?;

    alice.channel.hold_close(true);
    alice.connector.close().await;
    assert_eq!(alice.connector.status(), ConnectionStatus::Disconnecting);

    let err = alice.connector.send(&json!("closing")).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::NotConnected);
    Ok(())
}

#[tokio::test]
async fn test_signaling_presence_gates_sends() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 5_000)).await;
    assert_eq!(alice.connector.presence(), None);

    let gone: SignalingNotification =
        serde_json::from_value(json!({ "info": "remoteClientDisconnected", "target": "wallet" }))?;
    assert_eq!(alice.connector.on_signaling(&gone), Some(PeerPresence::Disconnected));

    let err = alice.connector.send(&json!("hello?")).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::NotConnected);
    assert_eq!(alice.channel.sent_count(), 0);

    let unrelated: SignalingNotification =
        serde_json::from_value(json!({ "info": "iceCandidate", "data": {} }))?;
    assert_eq!(alice.connector.on_signaling(&unrelated), None);
    assert_eq!(alice.connector.presence(), Some(PeerPresence::Disconnected));

    let back = SignalingNotification::from_info("remoteClientIsAlreadyConnected");
    assert_eq!(alice.connector.on_signaling(&back), Some(PeerPresence::AlreadyConnected));

    alice.connector.send(&json!("hello again")).await?;
    assert_eq!(next_message(&mut bob.inbox).await?.message, json!("hello again"));
    Ok(())
}

#[tokio::test]
async fn test_sent_event_reports_each_transmission() -> Result<()> {
    let (alice, _bob) = linked_peers(transport(4, 5_000)).await;
    let mut progress = alice.connector.sent_events();

    let first = alice.connector.send(&json!(1)).await?;
    let second = alice.connector.send(&json!(2)).await?;

    assert_eq!(progress.recv().await?, SendEvent::MessageSent { message_id: first });
    assert_eq!(progress.recv().await?, SendEvent::MessageSent { message_id: second });
    Ok(())
}

#[tokio::test]
async fn test_destroy_is_idempotent_and_final() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 1_000)).await;
    alice.connector.send(&json!("before")).await?;
    next_message(&mut bob.inbox).await?;

    bob.connector.destroy().await;
    bob.connector.destroy().await;
    assert_eq!(bob.connector.status(), ConnectionStatus::Disconnected);

    // Bob no longer answers, so alice's send can only time out.
    let err = alice.connector.send(&json!("after")).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::Timeout);
    assert!(bob.inbox.recv().await.is_none());
    Ok(())
}
