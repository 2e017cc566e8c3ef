//! Peer presence tracking from signaling notifications.

use std::sync::Arc;

use tokio::sync::watch;

use tether_core::presence::{PeerPresence, SignalingNotification};

/// Latest peer presence reported by the signaling layer.
///
/// Starts out unknown. Sends are allowed while unknown or connected and
/// refused once the remote client is reported gone.
#[derive(Clone)]
pub struct PresenceTracker {
    tx: Arc<watch::Sender<Option<PeerPresence>>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Classify `notification` and record it if it carries presence.
    /// Returns the classification, `None` for non-presence notifications.
    pub fn apply(&self, notification: &SignalingNotification) -> Option<PeerPresence> {
        let presence = notification.classify()?;
        self.tx.send_if_modified(|current| {
            if *current == Some(presence) {
                return false;
            }
            tracing::info!(
                from = ?current,
                to = ?presence,
                connected = presence.is_connected(),
                "peer presence changed"
            );
            *current = Some(presence);
            true
        });
        Some(presence)
    }

    pub fn presence(&self) -> Option<PeerPresence> {
        *self.tx.borrow()
    }

    pub fn allows_send(&self) -> bool {
        self.presence().map_or(true, PeerPresence::is_connected)
    }

    pub fn watch(&self) -> watch::Receiver<Option<PeerPresence>> {
        self.tx.subscribe()
    }
}
