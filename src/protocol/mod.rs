//! OpenFlow 1.0 wire protocol subset and data-plane frame parsing.
//!
//! Only the messages the controller exchanges with the diamond switches are
//! modelled; anything else decodes as [`OfMessage::Unsupported`].
//!
//! ## Header Format
//!
//! ```text
//! ┌─────────────┬──────────┬──────────────┬──────────────────┐
//! │ Version (1) │ Type (1) │ Length (2)   │ Transaction (4)  │
//! ├─────────────┴──────────┴──────────────┴──────────────────┤
//! │                      Body ...                            │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod message;
mod packet;

pub use codec::{decode_message, encode_message, OpenFlowCodec};
pub use message::{
    Action, ErrorMsg, FeaturesReply, FlowMod, FlowModCommand, OfMessage, OfMatch, PacketIn,
    PhyPort, PortMod, PortStatus, PortStatusReason,
};
pub use packet::{ArpPacket, EtherType, EthernetFrame, Ipv4Header, L3};

/// OpenFlow 1.0 version byte.
pub const OFP_VERSION: u8 = 0x01;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest message the codec accepts (the length field is 16 bits).
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// No buffered packet.
pub const NO_BUFFER: u32 = 0xffff_ffff;

/// Reserved port numbers.
pub mod port {
    /// Highest physical port.
    pub const MAX: u16 = 0xff00;
    pub const IN_PORT: u16 = 0xfff8;
    pub const TABLE: u16 = 0xfff9;
    pub const NORMAL: u16 = 0xfffa;
    /// All physical ports except the input port and NO_FLOOD ports.
    pub const FLOOD: u16 = 0xfffb;
    pub const ALL: u16 = 0xfffc;
    pub const CONTROLLER: u16 = 0xfffd;
    pub const LOCAL: u16 = 0xfffe;
    pub const NONE: u16 = 0xffff;
}

/// Port config bits.
pub mod port_config {
    pub const PORT_DOWN: u32 = 1 << 0;
    pub const NO_STP: u32 = 1 << 1;
    pub const NO_RECV: u32 = 1 << 2;
    pub const NO_RECV_STP: u32 = 1 << 3;
    /// Exclude the port from OFPP_FLOOD.
    pub const NO_FLOOD: u32 = 1 << 4;
    pub const NO_FWD: u32 = 1 << 5;
    pub const NO_PACKET_IN: u32 = 1 << 6;
}

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    Vendor = 4,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    GetConfigRequest = 7,
    GetConfigReply = 8,
    SetConfig = 9,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    PortMod = 15,
    StatsRequest = 16,
    StatsReply = 17,
    BarrierRequest = 18,
    BarrierReply = 19,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Hello),
            1 => Some(Self::Error),
            2 => Some(Self::EchoRequest),
            3 => Some(Self::EchoReply),
            4 => Some(Self::Vendor),
            5 => Some(Self::FeaturesRequest),
            6 => Some(Self::FeaturesReply),
            7 => Some(Self::GetConfigRequest),
            8 => Some(Self::GetConfigReply),
            9 => Some(Self::SetConfig),
            10 => Some(Self::PacketIn),
            11 => Some(Self::FlowRemoved),
            12 => Some(Self::PortStatus),
            13 => Some(Self::PacketOut),
            14 => Some(Self::FlowMod),
            15 => Some(Self::PortMod),
            16 => Some(Self::StatsRequest),
            17 => Some(Self::StatsReply),
            18 => Some(Self::BarrierRequest),
            19 => Some(Self::BarrierReply),
            _ => None,
        }
    }
}

/// Verify protocol version compatibility.
pub fn is_compatible_version(version: u8) -> bool {
    version == OFP_VERSION
}
