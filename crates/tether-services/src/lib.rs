//! tether-services: chunking, reassembly, confirmation and channel
//! plumbing on top of tether-core.

pub mod channel;
pub mod chunker;
pub mod connector;
pub mod gateway;
pub mod memory;
pub mod reassembler;
pub mod signaling;

pub use channel::{ChannelAdapter, ChannelError, ChannelEvent, DataChannel, RawPayload};
pub use chunker::{chunk_message, chunk_text, PrepareError, PreparedMessage};
pub use connector::{Connector, IncomingMessage};
pub use gateway::{ConfirmationGateway, SendError, SendEvent};
pub use memory::MemoryChannel;
pub use reassembler::{Reassembler, ReassemblyOutcome};
pub use signaling::PresenceTracker;
