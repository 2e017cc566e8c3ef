//! Reassembly of chunked messages with integrity verification.
//!
//! Frames for one message may arrive in any order, metadata included.
//! Chunks are buffered by index until the announced count is reached, then
//! joined, hashed and compared against `hashOfMessage`. Every message id
//! resolves exactly once, to a message or a rejection, and is then retired.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tether_core::crypto::ContentHasher;
use tether_core::wire::{ErrorReason, Frame, MessageChunk, MetaData};
use tether_core::Message;

/// Terminal result for one message id.
#[derive(Debug, Clone, PartialEq)]
pub enum ReassemblyOutcome {
    Reassembled {
        message_id: String,
        message: Message,
    },
    Rejected {
        message_id: String,
        reason: ErrorReason,
    },
}

impl ReassemblyOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            ReassemblyOutcome::Reassembled { message_id, .. }
            | ReassemblyOutcome::Rejected { message_id, .. } => message_id,
        }
    }

    /// The frame the receiver sends back for this outcome.
    pub fn reply(&self) -> Frame {
        match self {
            ReassemblyOutcome::Reassembled { message_id, .. } => {
                Frame::confirmation(message_id.clone())
            }
            ReassemblyOutcome::Rejected { message_id, reason } => {
                Frame::error(message_id.clone(), reason.clone())
            }
        }
    }
}

/// Default inactivity bound for a partial message.
pub const DEFAULT_ASSEMBLY_TTL: Duration = Duration::from_secs(60);

/// How many finished message ids are remembered so that late or replayed
/// frames for them are dropped instead of starting a new assembly.
pub const FINISHED_ID_MEMORY: usize = 1024;

/// Tracks messages being reassembled from incoming frames.
///
/// Owned by a single receive task, so it needs no interior locking.
pub struct Reassembler {
    active: HashMap<String, Assembly>,
    ttl: Duration,
    finished: HashSet<String>,
    finished_order: VecDeque<String>,
}

struct Assembly {
    metadata: Option<MetaData>,
    chunks: BTreeMap<u32, String>,
    last_frame_at: Instant,
}

impl Assembly {
    fn new() -> Self {
        Self {
            metadata: None,
            chunks: BTreeMap::new(),
            last_frame_at: Instant::now(),
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_ASSEMBLY_TTL)
    }
}

impl Reassembler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            active: HashMap::new(),
            ttl,
            finished: HashSet::new(),
            finished_order: VecDeque::new(),
        }
    }

    /// Feed one inbound frame. Reply frames are not this component's
    /// concern and are ignored.
    pub fn accept(&mut self, frame: Frame) -> Option<ReassemblyOutcome> {
        match frame {
            Frame::MetaData(metadata) => self.add_metadata(metadata),
            Frame::Chunk(chunk) => self.add_chunk(chunk),
            Frame::Confirmation(_) | Frame::Error(_) => None,
        }
    }

    /// Record the announcement for a message. May arrive before or after
    /// any of its chunks.
    pub fn add_metadata(&mut self, metadata: MetaData) -> Option<ReassemblyOutcome> {
        let message_id = metadata.message_id.clone();
        if self.is_finished(&message_id) {
            return None;
        }
        let assembly = self.active.entry(message_id.clone()).or_insert_with(Assembly::new);
        assembly.last_frame_at = Instant::now();

        let checked = match &assembly.metadata {
            Some(existing) if existing == &metadata => return None,
            Some(_) => Err("conflicting metadata"),
            None if metadata.chunk_count == 0 => Err("zero chunk count"),
            None => match assembly.chunks.keys().next_back() {
                Some(&highest) if highest >= metadata.chunk_count => {
                    Err("chunk index beyond announced count")
                }
                _ => Ok(()),
            },
        };
        if let Err(detail) = checked {
            return Some(self.reject(&message_id, detail));
        }

        tracing::trace!(
            message_id = %message_id,
            chunk_count = metadata.chunk_count,
            buffered = assembly.chunks.len(),
            "metadata received"
        );
        assembly.metadata = Some(metadata);
        self.try_complete(&message_id)
    }

    /// Buffer one chunk by its declared index.
    pub fn add_chunk(&mut self, chunk: MessageChunk) -> Option<ReassemblyOutcome> {
        let message_id = chunk.message_id;
        if self.is_finished(&message_id) {
            return None;
        }
        let assembly = self.active.entry(message_id.clone()).or_insert_with(Assembly::new);
        assembly.last_frame_at = Instant::now();

        if let Some(metadata) = &assembly.metadata {
            if chunk.chunk_index >= metadata.chunk_count {
                return Some(self.reject(&message_id, "chunk index beyond announced count"));
            }
        }

        match assembly.chunks.get(&chunk.chunk_index) {
            Some(existing) if existing == &chunk.chunk_data => return None,
            Some(_) => {
                return Some(self.reject(&message_id, "conflicting data for chunk index"));
            }
            None => {}
        }

        tracing::trace!(
            message_id = %message_id,
            chunk_index = chunk.chunk_index,
            "chunk received"
        );
        assembly.chunks.insert(chunk.chunk_index, chunk.chunk_data);
        self.try_complete(&message_id)
    }

    /// Finish the message if metadata and every chunk are present.
    fn try_complete(&mut self, message_id: &str) -> Option<ReassemblyOutcome> {
        let complete = self.active.get(message_id).is_some_and(|a| {
            a.metadata
                .as_ref()
                .is_some_and(|m| a.chunks.len() == m.chunk_count as usize)
        });
        if !complete {
            return None;
        }

        let assembly = self.active.remove(message_id)?;
        self.remember_finished(message_id);
        let metadata = assembly.metadata?;

        // The announced byte count is unchecked until after the hash.
        let received_len = assembly.chunks.values().map(String::len).sum();
        let mut hasher = ContentHasher::new();
        let mut text = String::with_capacity(received_len);
        // Indices are bounded by chunk_count and unique, so a full map
        // holds exactly 0..chunk_count in order.
        for piece in assembly.chunks.values() {
            hasher.update(piece);
            text.push_str(piece);
        }

        let outcome = if hasher.finalize_hex() != metadata.hash_of_message {
            tracing::warn!(message_id, "message hash mismatch, rejecting");
            ReassemblyOutcome::Rejected {
                message_id: message_id.to_string(),
                reason: ErrorReason::MessageHashesMismatch,
            }
        } else if text.len() as u64 != metadata.message_byte_count {
            tracing::warn!(
                message_id,
                announced = metadata.message_byte_count,
                actual = text.len(),
                "message byte count mismatch, rejecting"
            );
            ReassemblyOutcome::Rejected {
                message_id: message_id.to_string(),
                reason: ErrorReason::MalformedMessage,
            }
        } else {
            match serde_json::from_str::<Message>(&text) {
                Ok(message) => {
                    tracing::debug!(
                        message_id,
                        chunks = metadata.chunk_count,
                        bytes = metadata.message_byte_count,
                        "message reassembled"
                    );
                    ReassemblyOutcome::Reassembled {
                        message_id: message_id.to_string(),
                        message,
                    }
                }
                Err(e) => {
                    tracing::warn!(message_id, error = %e, "reassembled text is not JSON, rejecting");
                    ReassemblyOutcome::Rejected {
                        message_id: message_id.to_string(),
                        reason: ErrorReason::MalformedMessage,
                    }
                }
            }
        };
        Some(outcome)
    }

    /// Out-of-protocol frames reject their own message only.
    fn reject(&mut self, message_id: &str, detail: &'static str) -> ReassemblyOutcome {
        self.active.remove(message_id);
        self.remember_finished(message_id);
        tracing::warn!(message_id, detail, "out-of-protocol frame, rejecting message");
        ReassemblyOutcome::Rejected {
            message_id: message_id.to_string(),
            reason: ErrorReason::MalformedMessage,
        }
    }

    /// Drop assemblies that have seen no frame for longer than the TTL.
    /// Returns the retired message ids.
    pub fn cleanup_stale(&mut self) -> Vec<String> {
        let ttl = self.ttl;
        let mut retired = Vec::new();
        self.active.retain(|message_id, assembly| {
            let stale = assembly.last_frame_at.elapsed() > ttl;
            if stale {
                tracing::warn!(
                    message_id,
                    buffered = assembly.chunks.len(),
                    "removing stale assembly (timed out)"
                );
                retired.push(message_id.clone());
            }
            !stale
        });
        for message_id in &retired {
            self.remember_finished(message_id);
        }
        retired
    }

    fn is_finished(&self, message_id: &str) -> bool {
        let finished = self.finished.contains(message_id);
        if finished {
            tracing::trace!(message_id, "frame for finished message, ignoring");
        }
        finished
    }

    fn remember_finished(&mut self, message_id: &str) {
        if !self.finished.insert(message_id.to_string()) {
            return;
        }
        self.finished_order.push_back(message_id.to_string());
        if self.finished_order.len() > FINISHED_ID_MEMORY {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }

    /// Message ids currently being received.
    pub fn in_progress(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// Discard every partial message.
    pub fn abandon_all(&mut self) -> usize {
        let count = self.active.len();
        self.active.clear();
        count
    }
}
