//! Local channel lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the underlying data channel is in its lifecycle.
///
/// This is what the local side knows about its own channel. Whether the
/// remote party is present is a separate, signaling-level observation
/// (see [`crate::presence::PeerPresence`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// No further transitions are expected from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disconnected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnecting => "disconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
