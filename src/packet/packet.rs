use std::time::Duration;

use anyhow::{anyhow, bail};
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

use crate::packet::options::{PacketOptions, PacketType};
use crate::packet::raw::RawPacket;
use crate::packet::response_link::ResponseLink;
use crate::packet::send_state::{SendState, StateSignal};

/// The reserved command of an acknowledgement: confirms receipt, carries no application data
pub const ACK_COMMAND: &str = "ACK";
/// command and status of the reply sent back when a command handler failed
pub const ERROR_COMMAND: &str = "ERROR";
pub const ERROR_STATUS: &str = "ERROR";

const MAX_CHECKPOINTS: usize = 8;

/// Local bookkeeping for sending a packet. None of this travels on the wire.
#[derive(Clone, Debug, Default)]
pub struct CommData {
    send_state: SendState,
    last_sent: Option<Instant>,
    reply_wait_since: Option<Instant>,
    retry_not_before: Option<Instant>,
    error: bool,
    suspended: bool,

    /// time to wait for an ACK (or a reply on one-shot transports) after sending, zero for 'forever'
    pub timeout: Duration,
    /// time to wait for the reply after the ACK arrived, zero for 'same as `timeout`'
    pub reply_timeout: Duration,
    pub retries_remaining: u32,
    pub retry_wait: Duration,
    pub response_link: Option<ResponseLink>,
}
impl CommData {
    pub fn send_state(&self) -> SendState {
        self.send_state
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    fn reset_for_send(&mut self) {
        let response_link = self.response_link.take();
        *self = CommData {
            response_link,
            ..CommData::default()
        };
    }
}

/// A snapshot of a packet's state, taken before its content is overwritten by a reply
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub send_state: SendState,
    pub command: String,
    pub status: Option<String>,
    pub payload: Value,
    pub taken_at: Instant,
}

#[derive(Clone, Debug)]
pub struct Packet {
    pub seqid: String,
    pub command: String,
    pub origin: String,
    pub target: String,
    pub status: Option<String>,
    pub payload: Value,
    pub session_id: Option<String>,
    pub options: PacketOptions,
    comm: CommData,
    checkpoints: Vec<Checkpoint>,
}

impl Packet {
    pub fn new(command: impl Into<String>) -> Packet {
        Packet {
            seqid: Self::generate_seqid(),
            command: command.into(),
            origin: String::new(),
            target: String::new(),
            status: None,
            payload: Value::Null,
            session_id: None,
            options: PacketOptions::default(),
            comm: CommData::default(),
            checkpoints: Vec::new(),
        }
    }

    pub fn generate_seqid() -> String {
        format!("{:016x}", rand::random::<u64>())
    }

    pub fn with_payload(mut self, payload: Value) -> Packet {
        self.payload = payload;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Packet {
        self.target = target.into();
        self
    }

    pub fn with_reply_required(mut self, reply_required: bool) -> Packet {
        self.options.reply_required = reply_required;
        self
    }

    pub fn with_block_ui(mut self, block_ui: bool) -> Packet {
        self.options.block_ui = block_ui;
        self
    }

    /// A raw packet without a sequence id gets a freshly generated one.
    pub fn from_raw(raw: RawPacket) -> Packet {
        let seqid = match raw.seqid {
            Some(seqid) if !seqid.is_empty() => seqid,
            _ => Self::generate_seqid(),
        };
        Packet {
            seqid,
            command: raw.command,
            origin: raw.origin,
            target: raw.target,
            status: raw.status,
            payload: raw.payload,
            session_id: raw.session_id,
            options: raw.options,
            comm: CommData::default(),
            checkpoints: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Packet> {
        Ok(Self::from_raw(RawPacket::from_json(json)?))
    }

    pub fn to_raw(&self) -> RawPacket {
        RawPacket {
            seqid: Some(self.seqid.clone()),
            command: self.command.clone(),
            origin: self.origin.clone(),
            target: self.target.clone(),
            status: self.status.clone(),
            payload: self.payload.clone(),
            session_id: self.session_id.clone(),
            options: self.options.clone(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&self.to_raw())?)
    }

    pub fn comm(&self) -> &CommData {
        &self.comm
    }

    pub fn comm_mut(&mut self) -> &mut CommData {
        &mut self.comm
    }

    pub fn send_state(&self) -> SendState {
        self.comm.send_state
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn is_ack(&self) -> bool {
        self.command == ACK_COMMAND
    }

    /// Applies a state change. The returned signal reports how the packet's contribution to
    ///  the queue's 'sending', 'completed' and 'failed' aggregates changed.
    pub fn transition(&mut self, target: SendState) -> anyhow::Result<StateSignal> {
        let current = self.comm.send_state;
        trace!("packet {}: {} -> {}", self.seqid, current, target);

        let now = Instant::now();
        let signal = match target {
            SendState::New => return Err(Self::invalid_transition(&self.seqid, current, target)),
            SendState::Queued => {
                self.comm.error = false;
                self.comm.suspended = false;
                self.comm.last_sent = None;
                self.comm.reply_wait_since = None;
                self.comm.retry_not_before = None;
                self.comm.send_state = SendState::Queued;
                if current.is_active() {
                    StateSignal::new(Some(false), None, None)
                }
                else {
                    StateSignal::UNCHANGED
                }
            }
            SendState::Sending => {
                if current != SendState::Queued {
                    return Err(Self::invalid_transition(&self.seqid, current, target));
                }
                self.comm.last_sent = Some(now);
                self.comm.send_state = SendState::Sending;
                StateSignal::new(Some(true), None, None)
            }
            SendState::ReplyWait => {
                if current != SendState::Sending {
                    return Err(Self::invalid_transition(&self.seqid, current, target));
                }
                self.comm.reply_wait_since = Some(now);
                self.comm.send_state = SendState::ReplyWait;
                StateSignal::new(Some(true), None, None)
            }
            SendState::Completed => {
                match current {
                    SendState::Completed => StateSignal::UNCHANGED,
                    SendState::Failed | SendState::TimedOut => return Err(Self::invalid_transition(&self.seqid, current, target)),
                    _ => {
                        self.comm.send_state = SendState::Completed;
                        StateSignal::new(Some(false), Some(true), None)
                    }
                }
            }
            SendState::TimedOut => {
                if !current.is_active() {
                    return Err(Self::invalid_transition(&self.seqid, current, target));
                }
                if self.comm.retries_remaining > 0 {
                    self.comm.retries_remaining -= 1;
                    self.comm.send_state = SendState::Queued;
                    self.comm.retry_not_before = Some(now + self.comm.retry_wait);
                    StateSignal::new(Some(false), None, Some(false))
                }
                else {
                    self.comm.error = true;
                    self.comm.send_state = SendState::TimedOut;
                    StateSignal::new(Some(false), None, Some(true))
                }
            }
            SendState::Failed => {
                self.comm.error = true;
                self.comm.send_state = SendState::Failed;
                if current == SendState::Failed {
                    StateSignal::UNCHANGED
                }
                else {
                    StateSignal::new(Some(false), None, Some(true))
                }
            }
        };
        Ok(signal)
    }

    fn invalid_transition(seqid: &str, from: SendState, to: SendState) -> anyhow::Error {
        anyhow!("packet {}: invalid transition {} -> {}", seqid, from, to)
    }

    pub fn can_be_sent(&self) -> bool {
        if self.comm.send_state != SendState::Queued || self.comm.suspended {
            return false;
        }
        match self.comm.retry_not_before {
            Some(not_before) => Instant::now() >= not_before,
            None => true,
        }
    }

    pub fn can_be_removed(&self) -> bool {
        self.comm.send_state.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.comm.send_state.is_active()
    }

    pub fn is_timed_out(&self) -> bool {
        if self.comm.suspended {
            return false;
        }

        let (since, timeout) = match self.comm.send_state {
            SendState::Sending => (self.comm.last_sent, self.comm.timeout),
            SendState::ReplyWait => {
                let timeout = if self.comm.reply_timeout.is_zero() {
                    self.comm.timeout
                }
                else {
                    self.comm.reply_timeout
                };
                (self.comm.reply_wait_since, timeout)
            }
            _ => return false,
        };

        if timeout.is_zero() {
            return false;
        }
        match since {
            Some(since) => Instant::now().saturating_duration_since(since) > timeout,
            None => false,
        }
    }

    pub fn should_block_ui(&self) -> bool {
        self.options.block_ui && self.is_active()
    }

    pub fn is_suspended(&self) -> bool {
        self.comm.suspended
    }

    /// Suspending pauses a packet in place. Resuming restarts the timeout clock of a packet
    ///  that is underway, so time spent suspended does not count against it.
    pub fn suspend(&mut self, suspended: bool) {
        if self.comm.suspended && !suspended {
            let now = Instant::now();
            match self.comm.send_state {
                SendState::Sending => self.comm.last_sent = Some(now),
                SendState::ReplyWait => self.comm.reply_wait_since = Some(now),
                _ => {}
            }
        }
        self.comm.suspended = suspended;
    }

    pub fn requires_reply(&self) -> bool {
        self.options.reply_required
    }

    pub fn set_error(&mut self) {
        self.comm.error = true;
    }

    pub fn has_error(&self) -> bool {
        self.comm.error
    }

    /// Records the current state before the packet's content is overwritten, e.g. by a reply.
    pub fn checkpoint(&mut self) {
        if self.checkpoints.len() == MAX_CHECKPOINTS {
            self.checkpoints.remove(0);
        }
        self.checkpoints.push(Checkpoint {
            send_state: self.comm.send_state,
            command: self.command.clone(),
            status: self.status.clone(),
            payload: self.payload.clone(),
            taken_at: Instant::now(),
        });
    }

    /// With `for_send`, the copy starts a fresh lifecycle. The response link is kept either
    ///  way so that anything derived from an inbound packet is routed back where it came from.
    pub fn clone_for_send(&self, for_send: bool) -> Packet {
        let mut result = self.clone();
        if for_send {
            result.comm.reset_for_send();
            result.checkpoints.clear();
        }
        result
    }

    /// turns this packet into an acknowledgement of itself
    pub fn ack(&mut self) {
        self.command = ACK_COMMAND.to_string();
        self.status = None;
        self.payload = Value::Null;
        self.options.packet_type = PacketType::Ack;
        self.options.reply_required = false;
        self.options.block_ui = false;
    }

    /// turns this packet into a reply to itself, addressed back to its origin
    pub fn reply(&mut self, payload: Value, command: Option<&str>) {
        std::mem::swap(&mut self.origin, &mut self.target);
        self.payload = payload;
        if let Some(command) = command {
            self.command = command.to_string();
        }
        self.options.packet_type = PacketType::Reply;
        self.options.reply_required = false;
        self.options.block_ui = false;
    }

    /// copies a reply's content onto this (outbound) packet
    pub fn absorb_reply(&mut self, reply: &Packet) {
        self.command = reply.command.clone();
        self.target = reply.target.clone();
        self.origin = reply.origin.clone();
        self.status = reply.status.clone();
        self.payload = reply.payload.clone();
        self.session_id = reply.session_id.clone();
        self.options.reply_required = reply.options.reply_required;
        self.options.destroy_after_completion = reply.options.destroy_after_completion;
        self.options.packet_type = reply.options.packet_type;
        self.options.layer = reply.options.layer.clone();
    }

    pub fn validate_seqid(&self) -> anyhow::Result<()> {
        if self.seqid.is_empty() {
            bail!("packet without sequence id");
        }
        Ok(())
    }
}
