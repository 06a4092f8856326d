use serde_json::{json, Value};
use tracing::{debug, error, trace, warn, Instrument, Span};

use crate::packet::{Packet, PacketInput, PacketRef, ResponseLink, SendState, StateSignal, ERROR_COMMAND, ERROR_STATUS};
use crate::queue::packet_queue::PacketQueue;

/// how an inbound packet relates to the outbound packet with the same sequence id
#[derive(Debug)]
enum Correlation {
    /// the ACK for a packet that requires a reply
    AwaitingReply,
    /// the ACK for a packet that does not require a reply
    Acknowledged(StateSignal),
    /// the substantive reply
    Replied(StateSignal),
    /// does not fit the outbound packet's state
    Martian(SendState),
}

impl PacketQueue {
    /// Processes an inbound packet: either a response to one of this queue's packets, or a new
    ///  command from the remote side. ACK duties are handled here as well, i.e. the caller
    ///  never needs to acknowledge anything.
    ///
    /// The response link identifies where replies to the inbound packet should go (e.g. a
    ///  connection); it is attached to every packet this queue derives from the inbound packet.
    ///
    /// Nothing that goes wrong here is propagated: invalid packets are logged and dropped, and
    ///  failing command handlers are answered with an error reply.
    ///
    /// An inbound ACK that matches none of this queue's packets is dropped: it is neither
    ///  acknowledged nor passed to `on_command`, since acknowledging it would make two queues
    ///  ACK each other forever.
    #[tracing::instrument(level = "debug", skip_all, fields(origin = %self.inner.config.origin))]
    pub async fn receive(&self, inbound: impl Into<PacketInput>, response_link: Option<ResponseLink>) {
        let inbound = match inbound.into().into_inbound() {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("dropping invalid inbound packet: {}", e);
                return;
            }
        };

        let inbound_packet = {
            let mut p = inbound.lock();
            if p.comm().response_link.is_none() {
                p.comm_mut().response_link = response_link;
            }
            p.clone()
        };
        trace!("received {:?}", inbound);

        // only the first packet with the sequence id is ever matched
        let matched = self.inner.lock_state().store.find_by_seqid(&inbound_packet.seqid);
        match matched {
            Some(matched) => self.on_response(&matched, &inbound, &inbound_packet).await,
            None => self.on_new_command(inbound, &inbound_packet).await,
        }
    }

    async fn on_response(&self, matched: &PacketRef, inbound: &PacketRef, inbound_packet: &Packet) {
        let correlation = self.correlate(matched, inbound_packet);
        debug!("packet {}: {:?}", inbound_packet.seqid, correlation);

        match correlation {
            Ok(Correlation::AwaitingReply) => {}
            Ok(Correlation::Acknowledged(signal)) => {
                if signal.is_completed() {
                    self.inner.events.on_complete(matched).await;
                }
            }
            Ok(Correlation::Replied(signal)) => {
                if signal.is_completed() {
                    self.inner.events.on_complete(matched).await;
                }
                if self.inner.config.is_socket {
                    // every frame on a persistent connection is acknowledged, replies included
                    let mut ack = inbound_packet.clone_for_send(true);
                    ack.ack();
                    self.enqueue(ack).await;
                }
            }
            Ok(Correlation::Martian(send_state)) => {
                warn!("martian packet: {}, seqid: {}, sendstate: {}", inbound_packet.command, inbound_packet.seqid, send_state);
                self.inner.events.on_martian(inbound).await;
            }
            Err(e) => error!("error processing response {}: {}", inbound_packet.seqid, e),
        }
    }

    fn correlate(&self, matched: &PacketRef, inbound: &Packet) -> anyhow::Result<Correlation> {
        let mut matched = matched.lock();
        let send_state = matched.send_state();

        if inbound.is_ack() && send_state == SendState::Sending {
            if matched.requires_reply() {
                matched.transition(SendState::ReplyWait)?;
                return Ok(Correlation::AwaitingReply);
            }
            return Ok(Correlation::Acknowledged(matched.transition(SendState::Completed)?));
        }

        // a one-shot transport delivers the reply without a preceding ACK
        let is_reply = send_state == SendState::ReplyWait || (
            send_state == SendState::Sending
                && !self.inner.config.is_socket
                && matched.requires_reply()
        );
        if is_reply {
            matched.checkpoint();
            matched.absorb_reply(inbound);
            return Ok(Correlation::Replied(matched.transition(SendState::Completed)?));
        }

        Ok(Correlation::Martian(send_state))
    }

    async fn on_new_command(&self, inbound: PacketRef, inbound_packet: &Packet) {
        if inbound_packet.is_ack() {
            // acknowledging an ACK would start an endless ping-pong
            debug!("dropping ACK {} that matches no packet", inbound_packet.seqid);
            return;
        }

        let requires_reply = inbound_packet.requires_reply();
        if self.inner.config.is_socket || !requires_reply {
            let mut ack = inbound_packet.clone_for_send(true);
            ack.ack();
            self.enqueue(ack).await;
        }

        if requires_reply {
            self.dispatch_command(inbound);
        }
        else {
            self.dispatch_notification(inbound);
        }
    }

    /// Runs the command handler in the background and sends whatever it comes up with as the
    ///  reply. The handler may take arbitrarily long, and several may be pending at a time.
    fn dispatch_command(&self, command: PacketRef) {
        let queue = self.clone();
        tokio::spawn(async move {
            let seqid = command.seqid();
            let result = queue.inner.events.on_command(command.clone()).await;

            let reply = match result {
                Ok(Some(mut reply)) => {
                    if reply.comm().response_link.is_none() {
                        reply.comm_mut().response_link = command.lock().comm().response_link.clone();
                    }
                    reply
                }
                Ok(None) => {
                    let mut reply = command.lock().clone_for_send(true);
                    reply.reply(Value::Null, None);
                    reply
                }
                Err(e) => {
                    error!("command {} failed: {:#}", seqid, e);
                    let mut reply = command.lock().clone_for_send(true);
                    reply.reply(json!({ "error": format!("{:#}", e) }), Some(ERROR_COMMAND));
                    reply.status = Some(ERROR_STATUS.to_string());
                    reply
                }
            };
            queue.enqueue(reply).await;
        }.instrument(Span::current()));
    }

    fn dispatch_notification(&self, command: PacketRef) {
        let completed = command.lock().transition(SendState::Completed);
        if let Err(e) = completed {
            debug!("completing notification: {}", e);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.inner.events.on_command(command.clone()).await {
                error!("handling notification {} failed: {:#}", command.seqid(), e);
            }
        }.instrument(Span::current()));
    }

    async fn enqueue(&self, packet: Packet) {
        let seqid = packet.seqid.clone();
        if let Err(e) = self.send(packet).await {
            error!("error enqueueing {}: {}", seqid, e);
        }
    }
}
