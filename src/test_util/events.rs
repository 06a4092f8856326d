use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use crate::packet::{Packet, PacketRef};
use crate::queue::events::QueueEvents;
use crate::queue::packet_queue::PacketQueue;

/// A hook invocation, with packets identified by their sequence id
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueueEvent {
    Send(String),
    Abort(String),
    Command(String),
    BlockUi(bool),
    Transmit(bool),
    Fail(String),
    Complete(String),
    Martian(String),
}
impl QueueEvent {
    pub fn seqid(&self) -> Option<&str> {
        match self {
            QueueEvent::Send(seqid)
            | QueueEvent::Abort(seqid)
            | QueueEvent::Command(seqid)
            | QueueEvent::Fail(seqid)
            | QueueEvent::Complete(seqid)
            | QueueEvent::Martian(seqid) => Some(seqid),
            QueueEvent::BlockUi(_) | QueueEvent::Transmit(_) => None,
        }
    }
}

/// how [RecordingEvents] answers inbound commands
#[derive(Clone, Debug)]
pub enum CommandBehavior {
    /// let the queue generate an empty reply
    EmptyReply,
    Reply(Value),
    Fail(String),
}

/// A [QueueEvents] implementation that records every hook invocation, for asserting on them
///  afterwards. Sent packets are optionally forwarded to a peer queue as JSON, which makes two
///  queues talk to each other without any real transport.
pub struct RecordingEvents {
    events: Mutex<Vec<QueueEvent>>,
    sent: Mutex<Vec<PacketRef>>,
    command_behavior: Mutex<CommandBehavior>,
    peer: OnceLock<PacketQueue>,
}

impl Default for RecordingEvents {
    fn default() -> Self {
        RecordingEvents::new()
    }
}

impl RecordingEvents {
    pub fn new() -> RecordingEvents {
        RecordingEvents {
            events: Default::default(),
            sent: Default::default(),
            command_behavior: Mutex::new(CommandBehavior::EmptyReply),
            peer: OnceLock::new(),
        }
    }

    pub fn set_command_behavior(&self, command_behavior: CommandBehavior) {
        *self.command_behavior.lock().unwrap() = command_behavior;
    }

    /// Forwards every packet sent from now on to the peer's `receive`. This can be done only once.
    pub fn forward_to(&self, peer: PacketQueue) -> anyhow::Result<()> {
        if self.peer.set(peer).is_err() {
            bail!("peer queue was already set");
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap().clone()
    }

    /// the recorded events concerning packets with the given sequence id
    pub fn events_for(&self, seqid: &str) -> Vec<QueueEvent> {
        self.events.lock().unwrap().iter()
            .filter(|e| e.seqid() == Some(seqid))
            .cloned()
            .collect()
    }

    /// the recorded `on_transmit` and `on_block_ui` events
    pub fn flag_events(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap().iter()
            .filter(|e| e.seqid().is_none())
            .cloned()
            .collect()
    }

    /// all packets passed to `on_send`, in order
    pub fn sent_packets(&self) -> Vec<PacketRef> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.sent.lock().unwrap().clear();
    }

    fn record(&self, event: QueueEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl QueueEvents for RecordingEvents {
    async fn on_send(&self, packet: &PacketRef) {
        self.record(QueueEvent::Send(packet.seqid()));
        self.sent.lock().unwrap().push(packet.clone());

        if let Some(peer) = self.peer.get() {
            let json = packet.lock().to_json();
            match json {
                Ok(json) => peer.receive(json, None).await,
                Err(e) => error!("error serializing {:?}: {}", packet, e),
            }
        }
    }

    async fn on_abort(&self, packet: &PacketRef) {
        self.record(QueueEvent::Abort(packet.seqid()));
    }

    async fn on_command(&self, packet: PacketRef) -> anyhow::Result<Option<Packet>> {
        self.record(QueueEvent::Command(packet.seqid()));

        let command_behavior = self.command_behavior.lock().unwrap().clone();
        match command_behavior {
            CommandBehavior::EmptyReply => Ok(None),
            CommandBehavior::Reply(payload) => {
                let mut reply = packet.lock().clone_for_send(true);
                reply.reply(payload, None);
                Ok(Some(reply))
            }
            CommandBehavior::Fail(msg) => Err(anyhow!(msg)),
        }
    }

    async fn on_block_ui(&self, blocked: bool) {
        self.record(QueueEvent::BlockUi(blocked));
    }

    async fn on_transmit(&self, sending: bool) {
        self.record(QueueEvent::Transmit(sending));
    }

    async fn on_fail(&self, packet: &PacketRef) {
        self.record(QueueEvent::Fail(packet.seqid()));
    }

    async fn on_complete(&self, packet: &PacketRef) {
        self.record(QueueEvent::Complete(packet.seqid()));
    }

    async fn on_martian(&self, packet: &PacketRef) {
        self.record(QueueEvent::Martian(packet.seqid()));
    }
}
