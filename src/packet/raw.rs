use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::packet::options::PacketOptions;

/// The serialized form of a packet, i.e. what a transport puts on the wire. Only the
///  application-level fields travel; communication metadata stays local to each queue.
///
/// Serialization uses two-letter keys; on input, the long field names are accepted as well.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPacket {
    #[serde(rename = "SI", alias = "seqid", skip_serializing_if = "Option::is_none")]
    pub seqid: Option<String>,

    #[serde(rename = "CO", alias = "command")]
    pub command: String,

    #[serde(rename = "OR", alias = "origin")]
    pub origin: String,

    #[serde(rename = "TA", alias = "target")]
    pub target: String,

    #[serde(rename = "ST", alias = "status", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(rename = "PL", alias = "payload")]
    pub payload: Value,

    #[serde(rename = "SE", alias = "sessionid", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(rename = "OP", alias = "options")]
    pub options: PacketOptions,
}

impl RawPacket {
    pub fn from_json(json: &str) -> anyhow::Result<RawPacket> {
        Ok(serde_json::from_str(json)?)
    }

    /// a raw packet without a sequence id can be sent (one is generated), but it can never be
    ///  correlated with anything when it is received
    pub fn has_seqid(&self) -> bool {
        self.seqid.as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }
}
