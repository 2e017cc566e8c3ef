use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::*;

/// `{"a":1}` at chunk size 4 travels as exactly two chunks and comes out
/// equal on the far side, with the sender seeing the confirmation.
#[tokio::test]
async fn test_small_object_in_two_chunks() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(4, 5_000)).await;
    let mut wire = bob.channel.subscribe();

    let message_id = alice.connector.send(&json!({ "a": 1 })).await?;

    let Frame::MetaData(metadata) = next_frame(&mut wire).await? else {
        bail!("metadata must lead");
    };
    assert_eq!(metadata.message_id, message_id);
    assert_eq!(metadata.chunk_count, 2);
    assert_eq!(metadata.message_byte_count, 7);

    let mut data = Vec::new();
    for _ in 0..2 {
        match next_frame(&mut wire).await? {
            Frame::Chunk(chunk) => data.push(chunk.chunk_data),
            other => bail!("expected chunk, got {other:?}"),
        }
    }
    assert_eq!(data, ["{\"a\"", ":1}"]);

    let received = next_message(&mut bob.inbox).await?;
    assert_eq!(received.message_id, message_id);
    assert_eq!(received.message, json!({ "a": 1 }));
    Ok(())
}

#[tokio::test]
async fn test_round_trip_across_chunk_sizes() -> Result<()> {
    let message = json!({
        "greeting": "héllo wörld ✓ 🚀",
        "nested": { "list": [1, 2.5, null, true, "x"], "empty": {} },
        "long": "z".repeat(600),
    });

    for size in [1, 2, 3, 7, 64, 1_000, 15_441] {
        let (alice, mut bob) = linked_peers(transport(size, 0)).await;
        let message_id = alice.connector.send(&message).await?;
        let received = next_message(&mut bob.inbox).await?;
        assert_eq!(received.message_id, message_id, "chunk size {size}");
        assert_eq!(received.message, message, "chunk size {size}");
    }
    Ok(())
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct WalletRequest {
    method: String,
    interaction_id: u64,
    items: Vec<String>,
}

#[tokio::test]
async fn test_typed_message_round_trip() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(16, 5_000)).await;
    let request = WalletRequest {
        method: "sendTransaction".into(),
        interaction_id: 42,
        items: vec!["accountAddress".into(), "personaData".into()],
    };

    alice.connector.send(&request).await?;
    let received = next_message(&mut bob.inbox).await?;
    let decoded: WalletRequest = serde_json::from_value(received.message)?;
    assert_eq!(decoded, request);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_sends_are_independent() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(5, 5_000)).await;

    let mut sends = Vec::new();
    for n in 0..20 {
        let connector = alice.connector.clone();
        sends.push(tokio::spawn(async move {
            connector.send(&json!({ "n": n, "pad": "·".repeat(n) })).await
        }));
    }

    let mut confirmed = HashSet::new();
    for send in sends {
        confirmed.insert(send.await??);
    }
    assert_eq!(confirmed.len(), 20);

    let mut delivered = HashSet::new();
    let mut values = HashSet::new();
    for _ in 0..20 {
        let received = next_message(&mut bob.inbox).await?;
        values.insert(received.message["n"].as_u64().context("missing n")?);
        delivered.insert(received.message_id);
    }
    assert_eq!(delivered, confirmed);
    assert_eq!(values, (0..20).collect::<HashSet<u64>>());
    assert_eq!(alice.connector.pending_sends(), 0);
    Ok(())
}

#[tokio::test]
async fn test_both_peers_send_at_once() -> Result<()> {
    let (mut alice, mut bob) = linked_peers(transport(3, 5_000)).await;

    let ping = json!("ping");
    let pong = json!("pong");
    let (to_bob, to_alice) =
        tokio::join!(alice.connector.send(&ping), bob.connector.send(&pong));
    to_bob?;
    to_alice?;
    assert_eq!(next_message(&mut bob.inbox).await?.message, json!("ping"));
    assert_eq!(next_message(&mut alice.inbox).await?.message, json!("pong"));
    Ok(())
}

/// Frames held back and then released in reverse still reassemble.
#[tokio::test]
async fn test_reversed_frames_still_confirm() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(2, 0)).await;
    let held = Arc::new(Mutex::new(Vec::new()));
    {
        let held = held.clone();
        alice.channel.set_interceptor(move |text| {
            held.lock().unwrap().push(text.to_owned());
            None
        });
    }

    let mut progress = alice.connector.sent_events();
    let connector = alice.connector.clone();
    let send = tokio::spawn(async move { connector.send(&json!({ "order": [3, 2, 1] })).await });
    tokio::time::timeout(PROMPT, progress.recv()).await??;

    alice.channel.clear_interceptor();
    let frames: Vec<String> = held.lock().unwrap().drain(..).rev().collect();
    assert!(frames.len() > 2);
    for text in &frames {
        send_raw(&alice.channel, text)?;
    }

    let message_id = send.await??;
    let received = next_message(&mut bob.inbox).await?;
    assert_eq!(received.message_id, message_id);
    assert_eq!(received.message, json!({ "order": [3, 2, 1] }));
    Ok(())
}

/// The receiver answers before it hands the message over.
#[tokio::test]
async fn test_confirmation_precedes_delivery() -> Result<()> {
    let (alice, mut bob) = linked_peers(transport(8, 5_000)).await;
    let mut replies = alice.channel.subscribe();

    let message_id = alice.connector.send(&json!("ordered")).await?;
    match next_frame(&mut replies).await? {
        Frame::Confirmation(c) => assert_eq!(c.message_id, message_id),
        other => bail!("expected confirmation, got {other:?}"),
    }
    assert_eq!(next_message(&mut bob.inbox).await?.message_id, message_id);
    Ok(())
}
