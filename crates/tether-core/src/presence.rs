//! Peer presence: classifying signaling-server notifications.
//!
//! The signaling server tells each side when the remote client comes and
//! goes. Only three notification kinds carry presence; everything else the
//! server sends (ICE candidates, offers, answers, confirmations) belongs to
//! the negotiation layer and classifies as `None` here.

use serde::{Deserialize, Serialize};

/// Signaling-derived view of whether the remote party is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerPresence {
    JustConnected,
    AlreadyConnected,
    Disconnected,
}

impl PeerPresence {
    /// `JustConnected` and `AlreadyConnected` both count as connected.
    pub fn is_connected(self) -> bool {
        match self {
            PeerPresence::JustConnected | PeerPresence::AlreadyConnected => true,
            PeerPresence::Disconnected => false,
        }
    }
}

/// A signaling notification, keyed by its `info` discriminant.
///
/// Deserializes directly from a signaling server response object; fields
/// other than `info` are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "info", rename_all = "camelCase")]
pub enum SignalingNotification {
    RemoteClientJustConnected,
    RemoteClientIsAlreadyConnected,
    RemoteClientDisconnected,
    #[serde(other)]
    Other,
}

impl SignalingNotification {
    /// Interpret a bare `info` discriminant.
    pub fn from_info(info: &str) -> Self {
        match info {
            "remoteClientJustConnected" => SignalingNotification::RemoteClientJustConnected,
            "remoteClientIsAlreadyConnected" => {
                SignalingNotification::RemoteClientIsAlreadyConnected
            }
            "remoteClientDisconnected" => SignalingNotification::RemoteClientDisconnected,
            _ => SignalingNotification::Other,
        }
    }

    /// The presence this notification announces, or `None` when it is not a
    /// presence notification at all.
    pub fn classify(&self) -> Option<PeerPresence> {
        match self {
            SignalingNotification::RemoteClientJustConnected => Some(PeerPresence::JustConnected),
            SignalingNotification::RemoteClientIsAlreadyConnected => {
                Some(PeerPresence::AlreadyConnected)
            }
            SignalingNotification::RemoteClientDisconnected => Some(PeerPresence::Disconnected),
            SignalingNotification::Other => None,
        }
    }
}
