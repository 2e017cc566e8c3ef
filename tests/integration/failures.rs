use serde_json::json;

use tether_core::wire::ErrorReason;
use tether_services::{chunk_message, ChannelAdapter, SendError};

use crate::*;

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 2_000)).await;
    alice.channel.set_interceptor(|_| None);

    let started = tokio::time::Instant::now();
    let err = alice.connector.send(&json!({ "a": 1 })).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::Timeout);
    assert!(err.message_id.is_some());
    assert!(started.elapsed() >= Duration::from_millis(2_000));
    assert_eq!(alice.connector.pending_sends(), 0);
    assert!(bob.inbox.try_recv().is_err());
    Ok(())
}

/// A confirmation released just before the deadline wins, and the deadline
/// passing afterwards changes nothing.
#[tokio::test(start_paused = true)]
async fn test_confirmation_just_before_deadline() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 1_000)).await;
    let held = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let held = held.clone();
        // Hold back bob's reply.
        bob.channel.set_interceptor(move |text| {
            held.lock().unwrap().push(text.to_owned());
            None
        });
    }

    let mut progress = alice.connector.sent_events();
    let connector = alice.connector.clone();
    let send = tokio::spawn(async move { connector.send(&json!("edge")).await });
    tokio::time::timeout(PROMPT, progress.recv()).await??;
    next_message(&mut bob.inbox).await?;

    tokio::time::advance(Duration::from_millis(990)).await;
    bob.channel.clear_interceptor();
    let replies: Vec<String> = held.lock().unwrap().drain(..).collect();
    assert_eq!(replies.len(), 1);
    send_raw(&bob.channel, &replies[0])?;

    let message_id = send.await??;
    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(alice.connector.pending_sends(), 0);
    assert!(!message_id.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_send_before_open_is_not_connected() -> Result<()> {
    let (alice, _bob) = unopened_peers(transport(4, 1_000)).await;
    assert_eq!(alice.connector.status(), ConnectionStatus::Connecting);

    let err = alice.connector.send(&json!("early")).await.unwrap_err();
    assert_eq!(
        err,
        SendError {
            message_id: None,
            reason: ErrorReason::NotConnected,
        }
    );
    assert_eq!(alice.channel.sent_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_corrupted_chunk_is_rejected_then_resend_succeeds() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 5_000)).await;
    alice.channel.set_interceptor(|text| match Frame::decode(text) {
        Ok(Frame::Chunk(mut chunk)) if chunk.chunk_index == 0 => {
            chunk.chunk_data = chunk.chunk_data.replace('a', "b");
            Frame::Chunk(chunk).encode().ok()
        }
        _ => Some(text.to_owned()),
    });

    let err = alice.connector.send(&json!({ "a": 1 })).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::MessageHashesMismatch);
    assert!(bob.inbox.try_recv().is_err());

    alice.channel.clear_interceptor();
    alice.connector.send(&json!({ "a": 1 })).await?;
    assert_eq!(next_message(&mut bob.inbox).await?.message, json!({ "a": 1 }));
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_is_failed_to_send() -> Result<()> {
    let (alice, _bob) = linked_peers(transport(4, 1_000)).await;
    alice.channel.set_fail_sends(true);

    let err = alice.connector.send(&json!({ "a": 1 })).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::FailedToSendMessage);
    assert_eq!(alice.connector.pending_sends(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unserializable_message_fails_to_prepare() -> Result<()> {
    let (alice, _bob) = linked_peers(transport(4, 1_000)).await;
    let mut map = std::collections::HashMap::new();
    map.insert(vec![1u8], "key is not a string");

    let err = alice.connector.send(&map).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::FailedToPrepareMessage);
    assert_eq!(alice.channel.sent_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_destroy_fails_in_flight_sends() -> Result<()> {
    let (alice, _bob) = linked_peers(transport(4, 0)).await;
    alice.channel.set_interceptor(|_| None);

    let connector = alice.connector.clone();
    let send = tokio::spawn(async move { connector.send(&json!("never confirmed")).await });
    wait_for_pending(&alice.connector, 1).await?;

    alice.connector.destroy().await;
    assert_eq!(send.await?.unwrap_err().reason, ErrorReason::NotConnected);

    let err = alice.connector.send(&json!("after destroy")).await.unwrap_err();
    assert_eq!(err.reason, ErrorReason::NotConnected);
    Ok(())
}

#[tokio::test]
async fn test_peer_close_fails_in_flight_sends() -> Result<()> {
    let (alice, bob) = linked_peers(transport(4, 0)).await;
    alice.channel.set_interceptor(|_| None);

    let connector = alice.connector.clone();
    let send = tokio::spawn(async move { connector.send(&json!("cut off")).await });
    wait_for_pending(&alice.connector, 1).await?;

    bob.channel.close();
    assert_eq!(send.await?.unwrap_err().reason, ErrorReason::NotConnected);
    Ok(())
}

/// Reasons outside the local vocabulary reach the sender unchanged.
#[tokio::test]
async fn test_remote_error_reason_is_preserved() -> Result<()> {
    let (a, b) = MemoryChannel::pair();
    a.open();
    let (alice, _inbox) = Connector::new(a, transport(4, 5_000)).await;
    let remote = ChannelAdapter::new(b, 64);
    let mut frames = remote.subscribe().await.context("adapter destroyed")?;

    let message = json!({ "a": 1 });
    let (result, replied) = tokio::join!(alice.send(&message), async {
        loop {
            match frames.recv().await {
                Ok(Frame::MetaData(metadata)) => {
                    let reply = Frame::error(
                        metadata.message_id.clone(),
                        ErrorReason::Other("walletLocked".into()),
                    );
                    remote.send_frame(&reply).await.ok()?;
                    return Some(metadata.message_id);
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    });

    let message_id = replied.context("remote never answered")?;
    let err = result.unwrap_err();
    assert_eq!(err.message_id.as_deref(), Some(message_id.as_str()));
    assert_eq!(err.reason, ErrorReason::Other("walletLocked".into()));
    assert_eq!(err.reason.as_str(), "walletLocked");
    Ok(())
}

/// Replies for unknown ids and undecodable payloads never disturb a live
/// transfer.
#[tokio::test]
async fn test_noise_on_the_channel_is_ignored() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 5_000)).await;

    send_raw(&bob.channel, "not json at all")?;
    send_raw(&bob.channel, r#"{"packageType":"somethingElse","messageId":"x"}"#)?;
    send_raw(&bob.channel, &Frame::confirmation("nobody-waits-for-this").encode()?)?;
    send_raw(&alice.channel, "{\"packageType\":\"chunk\"}")?;

    alice.connector.send(&json!(["still", "fine"])).await?;
    assert_eq!(next_message(&mut bob.inbox).await?.message, json!(["still", "fine"]));
    Ok(())
}

/// A datagram transport may repeat frames; the message still arrives once.
#[tokio::test]
async fn test_replayed_frames_are_delivered_once() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 5_000)).await;
    let prepared = chunk_message(&json!({ "echo": true }), 4)?;

    for _ in 0..2 {
        for frame in prepared.frames() {
            send_raw(&alice.channel, &frame.encode()?)?;
        }
    }
    let received = next_message(&mut bob.inbox).await?;
    assert_eq!(received.message_id, prepared.message_id());

    // A later message proves the replay was consumed without a second delivery.
    alice.connector.send(&json!("next")).await?;
    assert_eq!(next_message(&mut bob.inbox).await?.message, json!("next"));
    assert!(bob.inbox.try_recv().is_err());
    Ok(())
}
