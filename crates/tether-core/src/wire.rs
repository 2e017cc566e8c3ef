//! Tether wire format: the JSON frames exchanged over a data channel.
//!
//! These types ARE the protocol. Field names and the `packageType`
//! discriminants are shared with peers implementing the companion
//! protocol, so every `rename` below is part of the wire format.
//!
//! A message travels as one `metaData` frame plus `chunkCount` `chunk`
//! frames. The receiver answers with `receiveMessageConfirmation` or
//! `receiveMessageError`, carrying the same `messageId`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Frames ───────────────────────────────────────────────────────────────────

/// One discrete unit on the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "packageType")]
pub enum Frame {
    #[serde(rename = "metaData")]
    MetaData(MetaData),

    #[serde(rename = "chunk")]
    Chunk(MessageChunk),

    #[serde(rename = "receiveMessageConfirmation")]
    Confirmation(Confirmation),

    #[serde(rename = "receiveMessageError")]
    Error(ErrorFrame),
}

/// Announces an incoming chunk sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    /// Number of `chunk` frames that make up the message. Always at least 1.
    pub chunk_count: u32,
    /// Hex BLAKE3 digest of the full serialized message.
    pub hash_of_message: String,
    pub message_id: String,
    /// UTF-8 length of the serialized message.
    pub message_byte_count: u64,
}

/// One ordered fragment of a serialized message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageChunk {
    /// Position in `[0, chunkCount)`. Receivers place chunks by this index,
    /// never by arrival order.
    pub chunk_index: u32,
    pub chunk_data: String,
    pub message_id: String,
}

/// Acknowledges successful reassembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub message_id: String,
}

/// Rejects a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub message_id: String,
    pub error: ErrorReason,
}

impl Frame {
    /// Confirmation reply for `message_id`.
    pub fn confirmation(message_id: impl Into<String>) -> Self {
        Frame::Confirmation(Confirmation {
            message_id: message_id.into(),
        })
    }

    /// Error reply for `message_id`.
    pub fn error(message_id: impl Into<String>, reason: ErrorReason) -> Self {
        Frame::Error(ErrorFrame {
            message_id: message_id.into(),
            error: reason,
        })
    }

    /// The message this frame belongs to.
    pub fn message_id(&self) -> &str {
        match self {
            Frame::MetaData(m) => &m.message_id,
            Frame::Chunk(c) => &c.message_id,
            Frame::Confirmation(c) => &c.message_id,
            Frame::Error(e) => &e.message_id,
        }
    }

    /// The `packageType` discriminant as it appears on the wire.
    pub fn package_type(&self) -> &'static str {
        match self {
            Frame::MetaData(_) => "metaData",
            Frame::Chunk(_) => "chunk",
            Frame::Confirmation(_) => "receiveMessageConfirmation",
            Frame::Error(_) => "receiveMessageError",
        }
    }

    /// True for the two reply kinds a sender waits on.
    pub fn is_reply(&self) -> bool {
        matches!(self, Frame::Confirmation(_) | Frame::Error(_))
    }

    /// Serialize to the JSON text pushed onto the channel.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Parse a frame from channel text.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Decode)
    }

    /// Parse a frame from a binary payload. Peers send either text or
    /// binary, so binary is treated as UTF-8 text first.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)?;
        Self::decode(text)
    }
}

// ── Error reasons ─────────────────────────────────────────────────────────────

/// Why a message failed, locally or as reported by the peer.
///
/// The set is open: a peer may report a reason this side has never heard
/// of, and it must reach the caller intact rather than be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorReason {
    NotConnected,
    FailedToSendMessage,
    FailedToPrepareMessage,
    Timeout,
    MessageHashesMismatch,
    MalformedMessage,
    DuplicateMessageId,
    Other(String),
}

impl ErrorReason {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorReason::NotConnected => "notConnected",
            ErrorReason::FailedToSendMessage => "failedToSendMessage",
            ErrorReason::FailedToPrepareMessage => "failedToPrepareMessage",
            ErrorReason::Timeout => "timeout",
            ErrorReason::MessageHashesMismatch => "messageHashesMismatch",
            ErrorReason::MalformedMessage => "malformedMessage",
            ErrorReason::DuplicateMessageId => "duplicateMessageId",
            ErrorReason::Other(reason) => reason,
        }
    }
}

impl From<String> for ErrorReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "notConnected" => ErrorReason::NotConnected,
            "failedToSendMessage" => ErrorReason::FailedToSendMessage,
            "failedToPrepareMessage" => ErrorReason::FailedToPrepareMessage,
            "timeout" => ErrorReason::Timeout,
            "messageHashesMismatch" => ErrorReason::MessageHashesMismatch,
            "malformedMessage" => ErrorReason::MalformedMessage,
            "duplicateMessageId" => ErrorReason::DuplicateMessageId,
            _ => ErrorReason::Other(value),
        }
    }
}

impl From<ErrorReason> for String {
    fn from(reason: ErrorReason) -> String {
        match reason {
            ErrorReason::Other(reason) => reason,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default maximum characters per chunk. Keeps an encoded chunk frame under
/// the 16 KiB message size that every data channel implementation accepts.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 15441;

/// Length of a hex-encoded message id.
pub const MESSAGE_ID_HEX_LEN: usize = 32;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or interpreting wire data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("binary payload is not valid UTF-8")]
    InvalidUtf8,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
