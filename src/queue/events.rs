use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::packet::{Packet, PacketRef};

/// The hooks through which a queue talks to the application and to the transport. Every hook
///  has a no-op default, so implementations only override what they care about.
///
/// Hooks are called without any of the queue's locks held, so they may call back into the
///  queue (`send`, `receive`, `error`, ...). They must not hold a packet's lock across such a
///  call though.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueEvents: Send + Sync + 'static {
    /// The packet should be transmitted now. This is the transport's hook: the queue never
    ///  touches the wire itself, and it learns the outcome only through `receive` or a timeout.
    async fn on_send(&self, _packet: &PacketRef) {}

    /// a packet underway is given up on, either because it timed out or the queue was braked hard
    async fn on_abort(&self, _packet: &PacketRef) {}

    /// A new inbound command. If the command requires a reply, the returned packet is sent as
    ///  the reply - `None` means 'send an empty reply', and an error is turned into an error
    ///  reply. For commands without a reply, the result is only logged.
    async fn on_command(&self, _packet: PacketRef) -> anyhow::Result<Option<Packet>> {
        Ok(None)
    }

    /// edge-triggered: whether any packet underway asks for the UI to be blocked
    async fn on_block_ui(&self, _blocked: bool) {}

    /// edge-triggered: whether the queue has anything underway
    async fn on_transmit(&self, _sending: bool) {}

    async fn on_fail(&self, _packet: &PacketRef) {}

    async fn on_complete(&self, _packet: &PacketRef) {}

    /// An inbound packet matched an outbound packet's sequence id, but did not fit the
    ///  outbound packet's state. The argument is the *inbound* packet.
    async fn on_martian(&self, _packet: &PacketRef) {}
}

/// for queues that are driven entirely by polling their packets' states
pub struct NoEvents;

impl QueueEvents for NoEvents {}
