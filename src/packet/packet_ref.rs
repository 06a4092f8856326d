use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::packet::packet::Packet;
use crate::packet::raw::RawPacket;
use crate::packet::send_state::SendState;

/// A shared handle to a packet. Once a packet is sent, the queue and the application share it
///  through this handle, and the handle's *identity* (not the packet's value) is what the queue
///  uses to detect duplicate sends.
///
/// NB: Never hold the lock across an `.await` or while calling into the queue - the queue
///  locks packets itself.
#[derive(Clone)]
pub struct PacketRef(Arc<Mutex<Packet>>);

impl PacketRef {
    pub fn new(packet: Packet) -> PacketRef {
        PacketRef(Arc::new(Mutex::new(packet)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Packet> {
        self.0.lock().unwrap()
    }

    pub fn snapshot(&self) -> Packet {
        self.lock().clone()
    }

    pub fn ptr_eq(&self, other: &PacketRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn seqid(&self) -> String {
        self.lock().seqid.clone()
    }

    pub fn send_state(&self) -> SendState {
        self.lock().send_state()
    }
}

impl From<Packet> for PacketRef {
    fn from(value: Packet) -> Self {
        PacketRef::new(value)
    }
}

impl Debug for PacketRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.try_lock() {
            Ok(packet) => write!(f, "PacketRef{{seqid:{:?}, command:{:?}, state:{}}}", packet.seqid, packet.command, packet.send_state()),
            Err(_) => write!(f, "PacketRef{{<locked>}}"),
        }
    }
}

/// Everything the queue accepts as a packet, normalized before it enters the queue
#[derive(Debug)]
pub enum PacketInput {
    Packet(Packet),
    Shared(PacketRef),
    Raw(RawPacket),
    Json(String),
}

impl PacketInput {
    /// Normalizes for sending: raw data without a sequence id gets one generated.
    pub fn into_packet_ref(self) -> anyhow::Result<PacketRef> {
        Ok(match self {
            PacketInput::Packet(packet) => PacketRef::new(packet),
            PacketInput::Shared(packet) => packet,
            PacketInput::Raw(raw) => PacketRef::new(Packet::from_raw(raw)),
            PacketInput::Json(json) => PacketRef::new(Packet::from_json(&json)?),
        })
    }

    /// Normalizes a received packet: without a sequence id, it can not be correlated and is
    ///  rejected.
    pub fn into_inbound(self) -> anyhow::Result<PacketRef> {
        let raw = match self {
            PacketInput::Packet(packet) => {
                packet.validate_seqid()?;
                return Ok(PacketRef::new(packet));
            }
            PacketInput::Shared(packet) => {
                packet.lock().validate_seqid()?;
                return Ok(packet);
            }
            PacketInput::Raw(raw) => raw,
            PacketInput::Json(json) => RawPacket::from_json(&json)?,
        };

        if !raw.has_seqid() {
            anyhow::bail!("packet without sequence id");
        }
        Ok(PacketRef::new(Packet::from_raw(raw)))
    }
}

impl From<Packet> for PacketInput {
    fn from(value: Packet) -> Self {
        PacketInput::Packet(value)
    }
}

impl From<PacketRef> for PacketInput {
    fn from(value: PacketRef) -> Self {
        PacketInput::Shared(value)
    }
}

impl From<&PacketRef> for PacketInput {
    fn from(value: &PacketRef) -> Self {
        PacketInput::Shared(value.clone())
    }
}

impl From<RawPacket> for PacketInput {
    fn from(value: RawPacket) -> Self {
        PacketInput::Raw(value)
    }
}

impl From<String> for PacketInput {
    fn from(value: String) -> Self {
        PacketInput::Json(value)
    }
}

impl From<&str> for PacketInput {
    fn from(value: &str) -> Self {
        PacketInput::Json(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[test]
    fn test_identity() {
        let a = PacketRef::new(Packet::new("x"));
        let b = PacketRef::new(a.snapshot());
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.seqid(), b.seqid());
    }

    #[rstest]
    #[case::json_with_seqid(PacketInput::from(r#"{"SI":"abc","CO":"x"}"#), true)]
    #[case::json_without_seqid(PacketInput::from(r#"{"CO":"x"}"#), false)]
    #[case::json_broken(PacketInput::from("{"), false)]
    #[case::raw_empty_seqid(PacketInput::from(RawPacket { seqid: Some(String::new()), ..Default::default() }), false)]
    #[case::packet(PacketInput::from(Packet::new("x")), true)]
    fn test_into_inbound(#[case] input: PacketInput, #[case] valid: bool) {
        assert_eq!(input.into_inbound().is_ok(), valid);
    }

    #[test]
    fn test_into_packet_ref_generates_seqid() {
        let packet = PacketInput::from(r#"{"CO":"x"}"#).into_packet_ref().unwrap();
        assert!(!packet.seqid().is_empty());
    }

    #[test]
    fn test_debug_while_locked() {
        let packet = PacketRef::new(Packet::new("x"));
        let _lock = packet.lock();
        assert_eq!(format!("{:?}", packet), "PacketRef{<locked>}");
    }
}
