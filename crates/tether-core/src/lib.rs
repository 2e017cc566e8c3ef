//! tether-core: wire frames, hashing, configuration and the presence
//! classifier. Every other tether crate depends on this one.

pub mod config;
pub mod crypto;
pub mod presence;
pub mod status;
pub mod wire;

pub use presence::{PeerPresence, SignalingNotification};
pub use status::ConnectionStatus;
pub use wire::{Confirmation, ErrorFrame, ErrorReason, Frame, MessageChunk, MetaData};

/// An application message as seen on the receive side.
///
/// Outbound messages may be any `serde::Serialize` value; inbound ones are
/// reconstructed as plain JSON and left for the application to interpret.
pub type Message = serde_json::Value;
