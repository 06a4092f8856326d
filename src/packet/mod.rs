//! The unit the queue operates on: an addressable message with a sequence id, a per-instance
//!  send state machine, and timeout / retry bookkeeping.

pub mod options;
#[allow(clippy::module_inception)]
pub mod packet;
pub mod packet_ref;
pub mod raw;
pub mod response_link;
pub mod send_state;

pub use options::{PacketOptions, PacketType};
pub use packet::{CommData, Checkpoint, Packet, ACK_COMMAND, ERROR_COMMAND, ERROR_STATUS};
pub use packet_ref::{PacketInput, PacketRef};
pub use raw::RawPacket;
pub use response_link::ResponseLink;
pub use send_state::{SendState, StateSignal};
