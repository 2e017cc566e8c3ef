//! Confirmation gateway: send a message and wait for the peer's verdict.
//!
//! One `send` transmits the metadata and chunk frames, then races the
//! peer's Confirmation or Error frame for that message id against an
//! optional timeout. Replies are routed by a single correlator task that
//! reads the adapter's frame stream and resolves pending sends by exact
//! message id.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use tether_core::wire::{ErrorReason, Frame};
use tether_core::ConnectionStatus;

use crate::channel::ChannelAdapter;
use crate::chunker::{chunk_message, PreparedMessage};
use crate::signaling::PresenceTracker;

/// Observations about a send that are not its final outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    /// Every frame left the local side. The peer has not confirmed yet.
    MessageSent { message_id: String },
}

/// Terminal failure of one send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("message send failed: {reason}")]
pub struct SendError {
    /// Absent when the send failed before an id was assigned.
    pub message_id: Option<String>,
    pub reason: ErrorReason,
}

impl SendError {
    fn new(message_id: Option<&str>, reason: ErrorReason) -> Self {
        Self {
            message_id: message_id.map(str::to_owned),
            reason,
        }
    }
}

type Resolution = Result<(), ErrorReason>;

/// message id → slot that resolves the waiting `send`.
type PendingSends = Arc<DashMap<String, oneshot::Sender<Resolution>>>;

/// Removes its pending entry however the send ends, including when the
/// caller drops the `send` future.
struct PendingGuard {
    pending: PendingSends,
    message_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.message_id);
    }
}

pub struct ConfirmationGateway {
    adapter: Arc<ChannelAdapter>,
    presence: PresenceTracker,
    pending: PendingSends,
    events: broadcast::Sender<SendEvent>,
    correlator: Option<JoinHandle<()>>,
}

impl ConfirmationGateway {
    /// Subscribe to `adapter`'s frames and start correlating replies.
    /// `event_buffer` bounds how many send events a slow observer may fall
    /// behind by.
    pub async fn new(
        adapter: Arc<ChannelAdapter>,
        presence: PresenceTracker,
        event_buffer: usize,
    ) -> Self {
        let pending: PendingSends = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(event_buffer.max(1));

        let correlator = adapter.subscribe().await.map(|frames| {
            tokio::spawn(correlate(frames, adapter.watch_status(), pending.clone()))
        });

        Self {
            adapter,
            presence,
            pending,
            events,
            correlator,
        }
    }

    /// Subscribe to non-terminal send observations.
    pub fn events(&self) -> broadcast::Receiver<SendEvent> {
        self.events.subscribe()
    }

    /// Sends currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a new send would be attempted right now.
    pub fn is_open(&self) -> bool {
        self.adapter.status().is_connected() && self.presence.allows_send()
    }

    /// Chunk and send `message`, then wait for the peer's verdict.
    ///
    /// Returns the message id once the peer confirms. `timeout` of `None`
    /// waits until a reply arrives or the channel goes away.
    pub async fn send<M: Serialize + ?Sized>(
        &self,
        message: &M,
        max_chunk_size: usize,
        timeout: Option<Duration>,
    ) -> Result<String, SendError> {
        if !self.is_open() {
            tracing::debug!(
                status = %self.adapter.status(),
                presence = ?self.presence.presence(),
                "send refused, not connected"
            );
            return Err(SendError::new(None, ErrorReason::NotConnected));
        }

        let prepared = chunk_message(message, max_chunk_size).map_err(|e| {
            tracing::warn!(error = %e, "failed to prepare message");
            SendError::new(None, ErrorReason::FailedToPrepareMessage)
        })?;

        self.send_prepared(prepared, timeout).await
    }

    /// Send an already chunked message and wait for the peer's verdict.
    pub async fn send_prepared(
        &self,
        prepared: PreparedMessage,
        timeout: Option<Duration>,
    ) -> Result<String, SendError> {
        let message_id = prepared.message_id().to_owned();
        let fail = |reason| Err(SendError::new(Some(&message_id), reason));

        let rx = {
            let (tx, rx) = oneshot::channel();
            match self.pending.entry(message_id.clone()) {
                Entry::Occupied(_) => {
                    tracing::error!(message_id = %message_id, "message id already in flight");
                    return fail(ErrorReason::DuplicateMessageId);
                }
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
            rx
        };
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            message_id: message_id.clone(),
        };

        // Registered first, so a disconnect from here on resolves this send.
        if !self.is_open() {
            return fail(ErrorReason::NotConnected);
        }

        for frame in prepared.frames() {
            if let Err(e) = self.adapter.send_frame(&frame).await {
                tracing::warn!(
                    message_id = %message_id,
                    package_type = frame.package_type(),
                    error = %e,
                    "failed to send frame"
                );
                return fail(ErrorReason::FailedToSendMessage);
            }
        }

        tracing::debug!(
            message_id = %message_id,
            frames = prepared.frame_count(),
            bytes = prepared.metadata.message_byte_count,
            "message sent, awaiting confirmation"
        );
        let _ = self.events.send(SendEvent::MessageSent {
            message_id: message_id.clone(),
        });

        let resolution = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(resolution) => resolution,
                Err(_) => {
                    tracing::warn!(
                        message_id = %message_id,
                        timeout_ms = limit.as_millis() as u64,
                        "no confirmation before timeout"
                    );
                    return fail(ErrorReason::Timeout);
                }
            },
            None => rx.await,
        };

        match resolution {
            Ok(Ok(())) => {
                tracing::debug!(message_id = %message_id, "message confirmed");
                Ok(message_id.clone())
            }
            Ok(Err(reason)) => {
                tracing::warn!(message_id = %message_id, %reason, "message rejected by peer");
                fail(reason)
            }
            // Slot dropped without a verdict: the correlator has gone.
            Err(_) => fail(ErrorReason::NotConnected),
        }
    }

    /// Stop correlating and fail every outstanding send with
    /// `notConnected`.
    pub fn shutdown(&mut self) {
        if let Some(correlator) = self.correlator.take() {
            correlator.abort();
        }
        fail_all(&self.pending, ErrorReason::NotConnected);
    }
}

impl Drop for ConfirmationGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Route reply frames to their pending sends until the frame stream ends.
async fn correlate(
    mut frames: broadcast::Receiver<Frame>,
    mut status: watch::Receiver<ConnectionStatus>,
    pending: PendingSends,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(Frame::Confirmation(c)) => resolve(&pending, &c.message_id, Ok(())),
                Ok(Frame::Error(e)) => resolve(&pending, &e.message_id, Err(e.error)),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "confirmation correlator lagged, replies may be lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if *status.borrow_and_update() == ConnectionStatus::Disconnected {
                    fail_all(&pending, ErrorReason::NotConnected);
                }
            }
        }
    }
    fail_all(&pending, ErrorReason::NotConnected);
    tracing::trace!("confirmation correlator exiting");
}

fn resolve(pending: &PendingSends, message_id: &str, resolution: Resolution) {
    match pending.remove(message_id) {
        Some((_, slot)) => {
            let _ = slot.send(resolution);
        }
        None => {
            tracing::debug!(message_id, "reply for unknown or settled message, ignoring");
        }
    }
}

fn fail_all(pending: &PendingSends, reason: ErrorReason) {
    let ids: Vec<String> = pending.iter().map(|e| e.key().clone()).collect();
    if !ids.is_empty() {
        tracing::debug!(count = ids.len(), %reason, "failing outstanding sends");
    }
    for id in ids {
        resolve(pending, &id, Err(reason.clone()));
    }
}
