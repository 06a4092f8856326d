//! A transport-agnostic packet queue: it drives packets through a send / acknowledge / reply
//!  lifecycle, retries or fails them on timeout, and correlates inbound packets with the
//!  outbound packets they answer.
//!
//! The queue never touches a transport itself. Transmission, command handling and state
//!  notifications all go through [queue::events::QueueEvents], and the transport feeds whatever
//!  arrives into [PacketQueue::receive].

pub mod packet;
pub mod queue;
pub mod test_util;

pub use packet::{Packet, PacketInput, PacketRef, ResponseLink, SendState};
pub use queue::config::QueueConfig;
pub use queue::events::{NoEvents, QueueEvents};
pub use queue::packet_queue::PacketQueue;
