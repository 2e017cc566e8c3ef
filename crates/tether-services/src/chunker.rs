//! Message chunking: serialize, hash, split into frames.

use serde::Serialize;

use tether_core::crypto::{content_hash, generate_message_id};
use tether_core::wire::{Frame, MessageChunk, MetaData};

/// A message split into frames, ready to transmit.
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    pub metadata: MetaData,
    /// Ordered by `chunk_index`, starting at 0.
    pub chunks: Vec<MessageChunk>,
}

impl PreparedMessage {
    pub fn message_id(&self) -> &str {
        &self.metadata.message_id
    }

    /// All frames in transmission order: metadata first, then each chunk.
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        std::iter::once(Frame::MetaData(self.metadata.clone()))
            .chain(self.chunks.iter().cloned().map(Frame::Chunk))
    }

    pub fn frame_count(&self) -> usize {
        self.chunks.len() + 1
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("max chunk size must be at least 1")]
    InvalidChunkSize,
}

/// Serialize `message` and split it into frames of at most
/// `max_chunk_size` characters each, under a freshly generated message id.
pub fn chunk_message<M: Serialize + ?Sized>(
    message: &M,
    max_chunk_size: usize,
) -> Result<PreparedMessage, PrepareError> {
    if max_chunk_size == 0 {
        return Err(PrepareError::InvalidChunkSize);
    }
    let text = serde_json::to_string(message).map_err(PrepareError::Serialize)?;
    chunk_text(&text, max_chunk_size, generate_message_id())
}

/// Split already-serialized text into frames under a caller-chosen id.
pub fn chunk_text(
    text: &str,
    max_chunk_size: usize,
    message_id: String,
) -> Result<PreparedMessage, PrepareError> {
    if max_chunk_size == 0 {
        return Err(PrepareError::InvalidChunkSize);
    }

    let chunks: Vec<MessageChunk> = split_chars(text, max_chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, chunk_data)| MessageChunk {
            chunk_index: index as u32,
            chunk_data,
            message_id: message_id.clone(),
        })
        .collect();

    let metadata = MetaData {
        chunk_count: chunks.len() as u32,
        hash_of_message: content_hash(text),
        message_id,
        message_byte_count: text.len() as u64,
    };

    tracing::trace!(
        message_id = %metadata.message_id,
        chunk_count = metadata.chunk_count,
        bytes = metadata.message_byte_count,
        "message prepared"
    );

    Ok(PreparedMessage { metadata, chunks })
}

/// Slices of at most `max` chars each, never splitting a code point.
/// Empty input still yields one (empty) slice.
fn split_chars(text: &str, max: usize) -> Vec<String> {
    let mut slices = Vec::with_capacity(text.len() / max + 1);
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max {
            slices.push(text[start..idx].to_string());
            start = idx;
            count = 0;
        }
        count += 1;
    }
    slices.push(text[start..].to_string());
    slices
}
