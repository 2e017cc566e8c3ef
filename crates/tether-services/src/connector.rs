//! Connector: one data channel's send and receive paths behind a single
//! handle.
//!
//! The receive task owns the [`Reassembler`]. For every finished message it
//! answers the sender first (confirmation or error frame) and only then
//! hands a reconstructed message to the application. Delivery never waits
//! on the application, so a slow reader cannot stall frame intake.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use tether_core::config::TransportConfig;
use tether_core::presence::{PeerPresence, SignalingNotification};
use tether_core::wire::Frame;
use tether_core::{ConnectionStatus, Message};

use crate::channel::{ChannelAdapter, DataChannel};
use crate::gateway::{ConfirmationGateway, SendError, SendEvent};
use crate::reassembler::{Reassembler, ReassemblyOutcome};
use crate::signaling::PresenceTracker;

/// Floor for how often idle partial messages are swept.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A message received from the peer, after the peer has been confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub message_id: String,
    pub message: Message,
}

pub struct Connector {
    adapter: Arc<ChannelAdapter>,
    gateway: ConfirmationGateway,
    presence: PresenceTracker,
    config: TransportConfig,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    /// Take over `channel` and start both paths. Received messages arrive
    /// on the returned receiver and are held there until read.
    pub async fn new(
        channel: Arc<dyn DataChannel>,
        config: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<IncomingMessage>) {
        let adapter = Arc::new(ChannelAdapter::new(channel, config.event_buffer));
        let presence = PresenceTracker::new();
        let gateway =
            ConfirmationGateway::new(adapter.clone(), presence.clone(), config.event_buffer).await;

        let (deliver, incoming) = mpsc::unbounded_channel();
        let receiver = adapter.subscribe().await.map(|frames| {
            let reassembler = Reassembler::new(config.reassembly_ttl());
            let sweep_every = (config.reassembly_ttl() / 2).max(MIN_SWEEP_INTERVAL);
            tokio::spawn(receive_loop(
                frames,
                adapter.clone(),
                reassembler,
                deliver,
                sweep_every,
            ))
        });

        tracing::debug!(
            max_chunk_size = config.max_chunk_size,
            timeout_ms = config.confirmation_timeout_ms,
            "connector started"
        );

        (
            Self {
                adapter,
                gateway,
                presence,
                config,
                receiver: Mutex::new(receiver),
            },
            incoming,
        )
    }

    /// Send `message` with the configured chunk size and timeout.
    pub async fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<String, SendError> {
        self.gateway
            .send(
                message,
                self.config.max_chunk_size,
                self.config.confirmation_timeout(),
            )
            .await
    }

    /// Send `message` with explicit chunking and timeout.
    pub async fn send_with<M: Serialize + ?Sized>(
        &self,
        message: &M,
        max_chunk_size: usize,
        timeout: Option<Duration>,
    ) -> Result<String, SendError> {
        self.gateway.send(message, max_chunk_size, timeout).await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.adapter.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.adapter.watch_status()
    }

    /// Feed a signaling notification. Returns its presence classification.
    pub fn on_signaling(&self, notification: &SignalingNotification) -> Option<PeerPresence> {
        self.presence.apply(notification)
    }

    pub fn presence(&self) -> Option<PeerPresence> {
        self.presence.presence()
    }

    pub fn sent_events(&self) -> broadcast::Receiver<SendEvent> {
        self.gateway.events()
    }

    /// Sends still waiting for the peer.
    pub fn pending_sends(&self) -> usize {
        self.gateway.pending_count()
    }

    /// Ask the transport to close. Outstanding sends fail once the close
    /// completes.
    pub async fn close(&self) {
        self.adapter.close().await;
    }

    /// Tear down both paths. Outstanding sends fail with `notConnected`,
    /// partial messages are discarded and nothing more is delivered.
    pub async fn destroy(&self) {
        self.adapter.destroy().await;
        let receiver = match self.receiver.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(receiver) = receiver {
            receiver.abort();
        }
        tracing::info!("connector destroyed");
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.receiver.lock() {
            if let Some(receiver) = guard.take() {
                receiver.abort();
            }
        }
    }
}

async fn receive_loop(
    mut frames: broadcast::Receiver<Frame>,
    adapter: Arc<ChannelAdapter>,
    mut reassembler: Reassembler,
    deliver: mpsc::UnboundedSender<IncomingMessage>,
    sweep_every: Duration,
) {
    let mut sweep = tokio::time::interval(sweep_every);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let Some(outcome) = reassembler.accept(frame) else {
                        continue;
                    };
                    finish(outcome, &adapter, &deliver).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "receive path lagged, frames lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = sweep.tick() => {
                let retired = reassembler.cleanup_stale();
                if !retired.is_empty() {
                    tracing::debug!(count = retired.len(), "retired stale assemblies");
                }
            }
        }
    }

    let abandoned = reassembler.abandon_all();
    tracing::debug!(abandoned, "receive loop exiting");
}

/// Reply to the sender, then deliver.
async fn finish(
    outcome: ReassemblyOutcome,
    adapter: &ChannelAdapter,
    deliver: &mpsc::UnboundedSender<IncomingMessage>,
) {
    if let Err(e) = adapter.send_frame(&outcome.reply()).await {
        tracing::warn!(
            message_id = outcome.message_id(),
            error = %e,
            "failed to send reply"
        );
    }

    match outcome {
        ReassemblyOutcome::Reassembled {
            message_id,
            message,
        } => {
            tracing::info!(message_id = %message_id, "message received");
            if deliver
                .send(IncomingMessage {
                    message_id,
                    message,
                })
                .is_err()
            {
                tracing::debug!("application receiver dropped, message discarded");
            }
        }
        ReassemblyOutcome::Rejected { message_id, reason } => {
            tracing::warn!(message_id = %message_id, %reason, "inbound message rejected");
        }
    }
}
