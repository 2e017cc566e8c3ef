//! Hashing and identifiers for Tether.
//!
//! Provides two things:
//!   1. BLAKE3 content hashes, hex-encoded for the `hashOfMessage` field
//!   2. Message id generation for correlating a send with its reply
//!
//! Payload encryption is not done here. An outer layer may wrap the
//! serialized message before it is chunked.

use rand::RngCore;

use crate::wire::MESSAGE_ID_HEX_LEN;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// The `hashOfMessage` value for a serialized message: lowercase hex of the
/// BLAKE3 digest of its UTF-8 bytes.
pub fn content_hash(text: &str) -> String {
    hex::encode(hash(text.as_bytes()))
}

/// Incremental hasher for text that arrives in pieces.
///
/// Produces the same value as [`content_hash`] over the concatenation.
pub struct ContentHasher(blake3::Hasher);

impl ContentHasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, piece: &str) {
        self.0.update(piece.as_bytes());
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize().as_bytes())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

// ── Message ids ───────────────────────────────────────────────────────────────

/// Generate a fresh message id: 16 random bytes, lowercase hex.
///
/// Ids only need to be unique among sends pending at the same time on one
/// channel; 128 random bits make a collision a non-event in practice.
pub fn generate_message_id() -> String {
    let mut bytes = [0u8; MESSAGE_ID_HEX_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
