use std::fmt::Write;

use tracing::trace;

use crate::packet::PacketRef;

/// The packets a queue currently handles, in insertion order - which is also the order in
///  which the scheduler looks at them.
///
/// No packet instance is in here twice. Between ticks, packets are only ever appended: the
///  scheduler is the only place where packets are removed (see [QueueStore::compact]).
#[derive(Default)]
pub struct QueueStore {
    packets: Vec<PacketRef>,
}

impl QueueStore {
    /// returns `false` if this very packet instance is already in the store
    pub fn push_unique(&mut self, packet: PacketRef) -> bool {
        if self.contains(&packet) {
            trace!("packet {:?} is already queued", packet);
            return false;
        }
        self.packets.push(packet);
        true
    }

    pub fn contains(&self, packet: &PacketRef) -> bool {
        self.packets.iter()
            .any(|p| p.ptr_eq(packet))
    }

    /// The first packet with the given sequence id that can be responded to. Sequence ids are
    ///  expected to be unique among packets in flight; if they are not, later packets with the
    ///  same id are never matched.
    ///
    /// ACKs are skipped: nothing ever responds to an ACK, and an ACK shares its sequence id with
    ///  the packet it acknowledges.
    pub fn find_by_seqid(&self, seqid: &str) -> Option<PacketRef> {
        self.packets.iter()
            .find(|p| {
                let p = p.lock();
                p.seqid == seqid && !p.is_ack()
            })
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<PacketRef> {
        self.packets.clone()
    }

    /// Drops finished packets from the first `snapshot_len` entries (the ones the scheduler
    ///  just evaluated) and returns how many of them remain. Packets appended after the
    ///  snapshot was taken are kept in place behind them. Packets re-queued by a hook after
    ///  they were evaluated are kept as well.
    pub fn compact(&mut self, snapshot_len: usize) -> usize {
        let snapshot_len = snapshot_len.min(self.packets.len());
        let appended = self.packets.split_off(snapshot_len);
        self.packets.retain(|p| !p.lock().can_be_removed());
        let num_retained = self.packets.len();
        self.packets.extend(appended);
        num_retained
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=&PacketRef> {
        self.packets.iter()
    }

    /// human-readable listing of the store's contents, not meant to be parsed
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (i, packet) in self.packets.iter().enumerate() {
            let packet = packet.lock();
            let _ = writeln!(out, "state[{}]: {}, seqid: {}, cmd: {}, last: {:?}, type: {}",
                i,
                packet.send_state(),
                packet.seqid,
                packet.command,
                packet.comm().last_sent(),
                packet.options.packet_type.code(),
            );
        }
        out
    }
}
