use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum PacketType {
    #[default]
    #[serde(rename = "RQ")]
    Request,
    #[serde(rename = "RP")]
    Reply,
    #[serde(rename = "AK")]
    Ack,
}

impl PacketType {
    pub fn code(&self) -> &'static str {
        match self {
            PacketType::Request => "RQ",
            PacketType::Reply => "RP",
            PacketType::Ack => "AK",
        }
    }
}

/// Per-packet options. These travel on the wire, and a reply's options are copied onto the
///  request it completes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketOptions {
    #[serde(rename = "TY", alias = "type")]
    pub packet_type: PacketType,

    #[serde(rename = "RR", alias = "reply")]
    pub reply_required: bool,

    /// the application should block its UI while this packet is underway
    #[serde(rename = "BU", alias = "blockui")]
    pub block_ui: bool,

    /// advisory for the transport: a completed packet's resources (e.g. its response link)
    ///  may be released right away
    #[serde(rename = "DA", alias = "destroyafter")]
    pub destroy_after_completion: bool,

    #[serde(rename = "LA", alias = "layer", skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}
