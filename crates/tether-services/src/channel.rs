//! Channel adapter: typed events over a raw peer data channel.
//!
//! The transport only knows lifecycle events and opaque text/binary
//! payloads. The adapter turns those into a `ConnectionStatus` watch and a
//! broadcast stream of decoded [`Frame`]s, and is the only thing that
//! touches the transport handle.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use tether_core::wire::{Frame, WireError};
use tether_core::ConnectionStatus;

// ── Transport interface ───────────────────────────────────────────────────────

/// A payload exactly as the transport delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    Text(String),
    Binary(Bytes),
}

/// Native events of a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Closing,
    Close,
    Error(String),
    Message(RawPayload),
}

/// The underlying peer data channel.
///
/// Delivery is best effort. Implementations must not block in `send`; a
/// payload that cannot be handed to the transport right away is an error.
pub trait DataChannel: Send + Sync {
    /// Whether the channel is open right now.
    fn is_open(&self) -> bool;

    /// Hand one text payload to the transport.
    fn send(&self, text: &str) -> Result<(), ChannelError>;

    /// Register a listener for channel events. Dropping the receiver
    /// deregisters it.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent>;

    /// Ask the transport to close. Completion is reported as `Close`.
    fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("data channel is not open")]
    NotOpen,
    #[error("channel adapter has been destroyed")]
    Destroyed,
    #[error(transparent)]
    Encode(#[from] WireError),
    #[error("transport rejected payload: {0}")]
    Transport(String),
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// Outlets that stop existing once the adapter is destroyed. Publishing
/// happens under this lock, so after `destroy` returns nothing more is
/// delivered.
struct Outlets {
    frames: broadcast::Sender<Frame>,
}

struct Shared {
    outlets: Mutex<Option<Outlets>>,
    status: watch::Sender<ConnectionStatus>,
}

pub struct ChannelAdapter {
    channel: Arc<dyn DataChannel>,
    shared: Arc<Shared>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChannelAdapter {
    /// Take ownership of `channel` and start translating its events.
    /// `buffer` bounds how far a frame subscriber may lag before frames
    /// are dropped for it.
    pub fn new(channel: Arc<dyn DataChannel>, buffer: usize) -> Self {
        let initial = if channel.is_open() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Connecting
        };
        let (status, _) = watch::channel(initial);
        let (frames, _) = broadcast::channel(buffer.max(1));
        let shared = Arc::new(Shared {
            outlets: Mutex::new(Some(Outlets { frames })),
            status,
        });

        let events = channel.subscribe();
        let pump = tokio::spawn(event_pump(events, shared.clone()));
        tracing::debug!(status = %initial, "channel adapter started");

        Self {
            channel,
            shared,
            pump: std::sync::Mutex::new(Some(pump)),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Subscribe to decoded inbound frames. `None` once destroyed.
    pub async fn subscribe(&self) -> Option<broadcast::Receiver<Frame>> {
        self.shared
            .outlets
            .lock()
            .await
            .as_ref()
            .map(|o| o.frames.subscribe())
    }

    /// Push one frame to the peer.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), ChannelError> {
        let text = frame.encode()?;
        tracing::trace!(
            message_id = frame.message_id(),
            package_type = frame.package_type(),
            len = text.len(),
            "sending frame"
        );
        self.send_text(&text).await
    }

    /// Push one already-serialized payload to the peer.
    pub async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        if self.shared.outlets.lock().await.is_none() {
            return Err(ChannelError::Destroyed);
        }
        self.channel.send(text)
    }

    /// Begin an orderly close. The status moves to `disconnecting` now and
    /// to `disconnected` when the transport reports `Close`.
    pub async fn close(&self) {
        if self.shared.outlets.lock().await.is_none() {
            return;
        }
        self.shared.status.send_if_modified(|s| {
            if s.is_terminal() {
                return false;
            }
            *s = ConnectionStatus::Disconnecting;
            true
        });
        self.channel.close();
    }

    /// Stop all event delivery and release the transport listener.
    ///
    /// Frame subscribers see their stream end, status settles at
    /// `disconnected`, and no further events are published after this
    /// returns.
    pub async fn destroy(&self) {
        let mut outlets = self.shared.outlets.lock().await;
        if outlets.take().is_none() {
            return;
        }
        self.shared.status.send_if_modified(|s| {
            let changed = *s != ConnectionStatus::Disconnected;
            *s = ConnectionStatus::Disconnected;
            changed
        });
        drop(outlets);

        let pump = match self.pump.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        tracing::debug!("channel adapter destroyed");
    }
}

impl Drop for ChannelAdapter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pump.lock() {
            if let Some(pump) = guard.take() {
                pump.abort();
            }
        }
    }
}

/// Translate transport events until the transport goes away or the
/// adapter is destroyed.
async fn event_pump(mut events: mpsc::UnboundedReceiver<ChannelEvent>, shared: Arc<Shared>) {
    while let Some(event) = events.recv().await {
        let guard = shared.outlets.lock().await;
        let Some(outlets) = guard.as_ref() else {
            break;
        };

        match event {
            ChannelEvent::Open => {
                tracing::debug!("data channel open");
                set_status(&shared.status, ConnectionStatus::Connected);
            }
            ChannelEvent::Closing => {
                tracing::debug!("data channel closing");
                set_status(&shared.status, ConnectionStatus::Disconnecting);
            }
            ChannelEvent::Close => {
                tracing::debug!("data channel closed");
                set_status(&shared.status, ConnectionStatus::Disconnected);
            }
            ChannelEvent::Error(reason) => {
                // The transport closes on its own after an error.
                tracing::debug!(%reason, "data channel error");
            }
            ChannelEvent::Message(payload) => match decode_payload(&payload) {
                Ok(frame) => {
                    tracing::trace!(
                        message_id = frame.message_id(),
                        package_type = frame.package_type(),
                        "received data channel frame"
                    );
                    // No subscribers is not an error; the frame is simply unobserved.
                    let _ = outlets.frames.send(frame);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "dropping malformed data channel payload");
                }
            },
        }
    }
    tracing::trace!("channel event pump exiting");
}

fn set_status(status: &watch::Sender<ConnectionStatus>, next: ConnectionStatus) {
    status.send_if_modified(|s| {
        if *s == next {
            return false;
        }
        tracing::debug!(from = %s, to = %next, "connection status changed");
        *s = next;
        true
    });
}

fn decode_payload(payload: &RawPayload) -> Result<Frame, WireError> {
    match payload {
        RawPayload::Text(text) => Frame::decode(text),
        RawPayload::Binary(bytes) => Frame::decode_bytes(bytes),
    }
}
