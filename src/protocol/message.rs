//! OpenFlow 1.0 message bodies.

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use super::{port, MessageType, HEADER_SIZE, NO_BUFFER, OFP_VERSION};
use crate::error::{ProtocolError, Result};
use crate::types::{DatapathId, MacAddr};

/// Size of `ofp_match`.
pub const MATCH_SIZE: usize = 40;

/// Size of `ofp_phy_port`.
pub const PHY_PORT_SIZE: usize = 48;

/// Wildcard bits of `ofp_match`.
mod wildcard {
    pub const IN_PORT: u32 = 1 << 0;
    pub const DL_VLAN: u32 = 1 << 1;
    pub const DL_SRC: u32 = 1 << 2;
    pub const DL_DST: u32 = 1 << 3;
    pub const DL_TYPE: u32 = 1 << 4;
    pub const NW_PROTO: u32 = 1 << 5;
    pub const TP_SRC: u32 = 1 << 6;
    pub const TP_DST: u32 = 1 << 7;
    pub const NW_SRC_SHIFT: u32 = 8;
    pub const NW_SRC_MASK: u32 = 0x3f << NW_SRC_SHIFT;
    pub const NW_SRC_ALL: u32 = 32 << NW_SRC_SHIFT;
    pub const NW_DST_SHIFT: u32 = 14;
    pub const NW_DST_MASK: u32 = 0x3f << NW_DST_SHIFT;
    pub const NW_DST_ALL: u32 = 32 << NW_DST_SHIFT;
    pub const DL_VLAN_PCP: u32 = 1 << 20;
    pub const NW_TOS: u32 = 1 << 21;
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedMessage {
        kind,
        reason: reason.into(),
    }
}

fn require(kind: &'static str, body: &[u8], len: usize) -> Result<()> {
    if body.len() < len {
        return Err(malformed(kind, format!("body is {} bytes, need {len}", body.len())).into());
    }
    Ok(())
}

fn read_mac(buf: &[u8]) -> MacAddr {
    MacAddr::from_slice(buf).unwrap_or_default()
}

/// Flow match. `None` fields are wildcarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OfMatch {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_type: Option<u16>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl OfMatch {
    /// Match everything.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: u16) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn dl_src(mut self, mac: MacAddr) -> Self {
        self.dl_src = Some(mac);
        self
    }

    pub fn dl_dst(mut self, mac: MacAddr) -> Self {
        self.dl_dst = Some(mac);
        self
    }

    /// IPv4 host-to-host match.
    pub fn ipv4(mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        self.dl_type = Some(super::EtherType::IPV4);
        self.nw_src = Some(src);
        self.nw_dst = Some(dst);
        self
    }

    /// TCP port match; implies IPv4.
    pub fn tcp_ports(mut self, src: u16, dst: u16) -> Self {
        self.dl_type = Some(super::EtherType::IPV4);
        self.nw_proto = Some(6);
        self.tp_src = Some(src);
        self.tp_dst = Some(dst);
        self
    }

    fn wildcards(&self) -> u32 {
        let mut w = wildcard::DL_VLAN | wildcard::DL_VLAN_PCP | wildcard::NW_TOS;
        if self.in_port.is_none() {
            w |= wildcard::IN_PORT;
        }
        if self.dl_src.is_none() {
            w |= wildcard::DL_SRC;
        }
        if self.dl_dst.is_none() {
            w |= wildcard::DL_DST;
        }
        if self.dl_type.is_none() {
            w |= wildcard::DL_TYPE;
        }
        if self.nw_proto.is_none() {
            w |= wildcard::NW_PROTO;
        }
        if self.tp_src.is_none() {
            w |= wildcard::TP_SRC;
        }
        if self.tp_dst.is_none() {
            w |= wildcard::TP_DST;
        }
        if self.nw_src.is_none() {
            w |= wildcard::NW_SRC_ALL;
        }
        if self.nw_dst.is_none() {
            w |= wildcard::NW_DST_ALL;
        }
        w
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.wildcards());
        buf.put_u16(self.in_port.unwrap_or(0));
        buf.put_slice(&self.dl_src.unwrap_or_default().octets());
        buf.put_slice(&self.dl_dst.unwrap_or_default().octets());
        buf.put_u16(0); // dl_vlan
        buf.put_u8(0); // dl_vlan_pcp
        buf.put_u8(0); // pad
        buf.put_u16(self.dl_type.unwrap_or(0));
        buf.put_u8(0); // nw_tos
        buf.put_u8(self.nw_proto.unwrap_or(0));
        buf.put_bytes(0, 2);
        buf.put_u32(self.nw_src.map_or(0, u32::from));
        buf.put_u32(self.nw_dst.map_or(0, u32::from));
        buf.put_u16(self.tp_src.unwrap_or(0));
        buf.put_u16(self.tp_dst.unwrap_or(0));
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        require("match", buf, MATCH_SIZE)?;
        let w = BigEndian::read_u32(&buf[0..4]);
        let exact = |bit: u32| w & bit == 0;
        let nw_exact = |mask: u32, shift: u32| (w & mask) >> shift < 32;

        Ok(Self {
            in_port: exact(wildcard::IN_PORT).then(|| BigEndian::read_u16(&buf[4..6])),
            dl_src: exact(wildcard::DL_SRC).then(|| read_mac(&buf[6..12])),
            dl_dst: exact(wildcard::DL_DST).then(|| read_mac(&buf[12..18])),
            dl_type: exact(wildcard::DL_TYPE).then(|| BigEndian::read_u16(&buf[22..24])),
            nw_proto: exact(wildcard::NW_PROTO).then(|| buf[25]),
            nw_src: nw_exact(wildcard::NW_SRC_MASK, wildcard::NW_SRC_SHIFT)
                .then(|| Ipv4Addr::from(BigEndian::read_u32(&buf[28..32]))),
            nw_dst: nw_exact(wildcard::NW_DST_MASK, wildcard::NW_DST_SHIFT)
                .then(|| Ipv4Addr::from(BigEndian::read_u32(&buf[32..36]))),
            tp_src: exact(wildcard::TP_SRC).then(|| BigEndian::read_u16(&buf[36..38])),
            tp_dst: exact(wildcard::TP_DST).then(|| BigEndian::read_u16(&buf[38..40])),
        })
    }
}

impl fmt::Display for OfMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        if let Some(port) = self.in_port {
            fields.push(format!("in_port={port}"));
        }
        if let Some(mac) = self.dl_src {
            fields.push(format!("dl_src={mac}"));
        }
        if let Some(mac) = self.dl_dst {
            fields.push(format!("dl_dst={mac}"));
        }
        if let Some(kind) = self.dl_type {
            fields.push(format!("dl_type={}", super::EtherType::from_u16(kind)));
        }
        if let Some(proto) = self.nw_proto {
            fields.push(format!("nw_proto={proto}"));
        }
        if let Some(addr) = self.nw_src {
            fields.push(format!("nw_src={addr}"));
        }
        if let Some(addr) = self.nw_dst {
            fields.push(format!("nw_dst={addr}"));
        }
        if let Some(p) = self.tp_src {
            fields.push(format!("tp_src={p}"));
        }
        if let Some(p) = self.tp_dst {
            fields.push(format!("tp_dst={p}"));
        }
        if fields.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", fields.join(","))
        }
    }
}

/// Flow action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Send out a port (physical or reserved).
    Output { port: u16, max_len: u16 },
    /// Any other action type, kept only for decoding.
    Other { kind: u16 },
}

impl Action {
    pub fn output(port: u16) -> Self {
        Self::Output { port, max_len: 0 }
    }

    pub fn flood() -> Self {
        Self::output(port::FLOOD)
    }

    pub fn controller() -> Self {
        Self::Output {
            port: port::CONTROLLER,
            max_len: 0xffff,
        }
    }

    /// Output port, if this is an output action.
    pub fn out_port(&self) -> Option<u16> {
        match self {
            Self::Output { port, .. } => Some(*port),
            Self::Other { .. } => None,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Output { port, max_len } => {
                buf.put_u16(0);
                buf.put_u16(8);
                buf.put_u16(*port);
                buf.put_u16(*max_len);
            }
            Self::Other { kind } => {
                buf.put_u16(*kind);
                buf.put_u16(8);
                buf.put_bytes(0, 4);
            }
        }
    }

    fn decode_list(mut buf: &[u8]) -> Result<Vec<Self>> {
        let mut actions = Vec::new();
        while !buf.is_empty() {
            require("action", buf, 4)?;
            let kind = BigEndian::read_u16(&buf[0..2]);
            let len = BigEndian::read_u16(&buf[2..4]) as usize;
            if len < 8 || len % 8 != 0 || len > buf.len() {
                return Err(malformed("action", format!("bad action length {len}")).into());
            }
            actions.push(if kind == 0 {
                Self::Output {
                    port: BigEndian::read_u16(&buf[4..6]),
                    max_len: BigEndian::read_u16(&buf[6..8]),
                }
            } else {
                Self::Other { kind }
            });
            buf = &buf[len..];
        }
        Ok(actions)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output { port: port::FLOOD, .. } => write!(f, "FLOOD"),
            Self::Output { port: port::CONTROLLER, .. } => write!(f, "CONTROLLER"),
            Self::Output { port, .. } => write!(f, "output:{port}"),
            Self::Other { kind } => write!(f, "action({kind})"),
        }
    }
}

/// Flow table modification command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

impl FlowModCommand {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(Self::Add),
            1 => Some(Self::Modify),
            2 => Some(Self::ModifyStrict),
            3 => Some(Self::Delete),
            4 => Some(Self::DeleteStrict),
            _ => None,
        }
    }
}

/// `OFPT_FLOW_MOD` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub pattern: OfMatch,
    pub cookie: u64,
    pub command: FlowModCommand,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u16,
    pub flags: u16,
    pub actions: Vec<Action>,
}

impl FlowMod {
    /// Fixed part of the body after the header.
    const FIXED_SIZE: usize = MATCH_SIZE + 24;

    /// Install a rule.
    pub fn add(pattern: OfMatch, priority: u16, actions: Vec<Action>) -> Self {
        Self {
            pattern,
            cookie: 0,
            command: FlowModCommand::Add,
            idle_timeout: 0,
            hard_timeout: 0,
            priority,
            buffer_id: NO_BUFFER,
            out_port: port::NONE,
            flags: 0,
            actions,
        }
    }

    /// Remove exactly the rule with this match and priority.
    pub fn delete_strict(pattern: OfMatch, priority: u16) -> Self {
        Self {
            command: FlowModCommand::DeleteStrict,
            ..Self::add(pattern, priority, vec![])
        }
    }

    /// Clear the whole flow table.
    pub fn delete_all() -> Self {
        Self {
            command: FlowModCommand::Delete,
            ..Self::add(OfMatch::any(), 0, vec![])
        }
    }

    pub fn with_timeouts(mut self, idle: u16, hard: u16) -> Self {
        self.idle_timeout = idle;
        self.hard_timeout = hard;
        self
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    /// Output ports of all output actions.
    pub fn out_ports(&self) -> Vec<u16> {
        self.actions.iter().filter_map(Action::out_port).collect()
    }

    fn encode(&self, buf: &mut BytesMut) {
        self.pattern.encode(buf);
        buf.put_u64(self.cookie);
        buf.put_u16(self.command as u16);
        buf.put_u16(self.idle_timeout);
        buf.put_u16(self.hard_timeout);
        buf.put_u16(self.priority);
        buf.put_u32(self.buffer_id);
        buf.put_u16(self.out_port);
        buf.put_u16(self.flags);
        for action in &self.actions {
            action.encode(buf);
        }
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require("flow_mod", body, Self::FIXED_SIZE)?;
        let pattern = OfMatch::decode(&body[..MATCH_SIZE])?;
        let rest = &body[MATCH_SIZE..];
        let command = BigEndian::read_u16(&rest[8..10]);
        Ok(Self {
            pattern,
            cookie: BigEndian::read_u64(&rest[0..8]),
            command: FlowModCommand::from_u16(command)
                .ok_or_else(|| malformed("flow_mod", format!("unknown command {command}")))?,
            idle_timeout: BigEndian::read_u16(&rest[10..12]),
            hard_timeout: BigEndian::read_u16(&rest[12..14]),
            priority: BigEndian::read_u16(&rest[14..16]),
            buffer_id: BigEndian::read_u32(&rest[16..20]),
            out_port: BigEndian::read_u16(&rest[20..22]),
            flags: BigEndian::read_u16(&rest[22..24]),
            actions: Action::decode_list(&rest[24..])?,
        })
    }
}

impl fmt::Display for FlowMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = match self.command {
            FlowModCommand::Add => "add",
            FlowModCommand::Modify => "modify",
            FlowModCommand::ModifyStrict => "modify_strict",
            FlowModCommand::Delete => "delete",
            FlowModCommand::DeleteStrict => "delete_strict",
        };
        write!(f, "{command} priority={} match={}", self.priority, self.pattern)?;
        if !self.actions.is_empty() {
            let actions: Vec<String> = self.actions.iter().map(ToString::to_string).collect();
            write!(f, " actions={}", actions.join(","))?;
        }
        if self.idle_timeout != 0 || self.hard_timeout != 0 {
            write!(f, " idle={}s hard={}s", self.idle_timeout, self.hard_timeout)?;
        }
        Ok(())
    }
}

/// `OFPT_PORT_MOD` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMod {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub config: u32,
    pub mask: u32,
    pub advertise: u32,
}

impl PortMod {
    const SIZE: usize = 24;

    /// Exclude a port from flooding.
    pub fn no_flood(port_no: u16, hw_addr: MacAddr) -> Self {
        Self {
            port_no,
            hw_addr,
            config: super::port_config::NO_FLOOD,
            mask: super::port_config::NO_FLOOD,
            advertise: 0,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.port_no);
        buf.put_slice(&self.hw_addr.octets());
        buf.put_u32(self.config);
        buf.put_u32(self.mask);
        buf.put_u32(self.advertise);
        buf.put_bytes(0, 4);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require("port_mod", body, Self::SIZE)?;
        Ok(Self {
            port_no: BigEndian::read_u16(&body[0..2]),
            hw_addr: read_mac(&body[2..8]),
            config: BigEndian::read_u32(&body[8..12]),
            mask: BigEndian::read_u32(&body[12..16]),
            advertise: BigEndian::read_u32(&body[16..20]),
        })
    }
}

/// `ofp_phy_port` description.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhyPort {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
}

impl PhyPort {
    pub fn new(port_no: u16, hw_addr: MacAddr, name: impl Into<String>) -> Self {
        Self {
            port_no,
            hw_addr,
            name: name.into(),
            ..Default::default()
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.port_no);
        buf.put_slice(&self.hw_addr.octets());
        let mut name = [0u8; 16];
        let bytes = self.name.as_bytes();
        let len = bytes.len().min(15);
        name[..len].copy_from_slice(&bytes[..len]);
        buf.put_slice(&name);
        buf.put_u32(self.config);
        buf.put_u32(self.state);
        buf.put_u32(self.curr);
        buf.put_u32(self.advertised);
        buf.put_u32(self.supported);
        buf.put_u32(self.peer);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        require("phy_port", buf, PHY_PORT_SIZE)?;
        let raw_name = &buf[8..24];
        let end = raw_name.iter().position(|b| *b == 0).unwrap_or(raw_name.len());
        Ok(Self {
            port_no: BigEndian::read_u16(&buf[0..2]),
            hw_addr: read_mac(&buf[2..8]),
            name: String::from_utf8_lossy(&raw_name[..end]).into_owned(),
            config: BigEndian::read_u32(&buf[24..28]),
            state: BigEndian::read_u32(&buf[28..32]),
            curr: BigEndian::read_u32(&buf[32..36]),
            advertised: BigEndian::read_u32(&buf[36..40]),
            supported: BigEndian::read_u32(&buf[40..44]),
            peer: BigEndian::read_u32(&buf[44..48]),
        })
    }
}

/// `OFPT_FEATURES_REPLY` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturesReply {
    pub datapath_id: DatapathId,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub capabilities: u32,
    pub actions: u32,
    pub ports: Vec<PhyPort>,
}

impl FeaturesReply {
    const FIXED_SIZE: usize = 24;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.datapath_id.as_u64());
        buf.put_u32(self.n_buffers);
        buf.put_u8(self.n_tables);
        buf.put_bytes(0, 3);
        buf.put_u32(self.capabilities);
        buf.put_u32(self.actions);
        for port in &self.ports {
            port.encode(buf);
        }
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require("features_reply", body, Self::FIXED_SIZE)?;
        let port_bytes = &body[Self::FIXED_SIZE..];
        if port_bytes.len() % PHY_PORT_SIZE != 0 {
            return Err(malformed("features_reply", "truncated port list").into());
        }
        let ports = port_bytes
            .chunks_exact(PHY_PORT_SIZE)
            .map(PhyPort::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            datapath_id: DatapathId(BigEndian::read_u64(&body[0..8])),
            n_buffers: BigEndian::read_u32(&body[8..12]),
            n_tables: body[12],
            capabilities: BigEndian::read_u32(&body[16..20]),
            actions: BigEndian::read_u32(&body[20..24]),
            ports,
        })
    }
}

/// `OFPT_PACKET_IN` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub in_port: u16,
    pub reason: u8,
    pub data: Vec<u8>,
}

impl PacketIn {
    const FIXED_SIZE: usize = 10;

    /// Unbuffered packet-in for a full frame.
    pub fn new(in_port: u16, data: Vec<u8>) -> Self {
        Self {
            buffer_id: NO_BUFFER,
            total_len: data.len() as u16,
            in_port,
            reason: 1, // OFPR_ACTION
            data,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.buffer_id);
        buf.put_u16(self.total_len);
        buf.put_u16(self.in_port);
        buf.put_u8(self.reason);
        buf.put_u8(0);
        buf.put_slice(&self.data);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require("packet_in", body, Self::FIXED_SIZE)?;
        Ok(Self {
            buffer_id: BigEndian::read_u32(&body[0..4]),
            total_len: BigEndian::read_u16(&body[4..6]),
            in_port: BigEndian::read_u16(&body[6..8]),
            reason: body[8],
            data: body[Self::FIXED_SIZE..].to_vec(),
        })
    }
}

/// Why a port status message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortStatusReason {
    Add,
    Delete,
    Modify,
}

/// `OFPT_PORT_STATUS` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortStatusReason,
    pub port: PhyPort,
}

impl PortStatus {
    const SIZE: usize = 8 + PHY_PORT_SIZE;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(match self.reason {
            PortStatusReason::Add => 0,
            PortStatusReason::Delete => 1,
            PortStatusReason::Modify => 2,
        });
        buf.put_bytes(0, 7);
        self.port.encode(buf);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require("port_status", body, Self::SIZE)?;
        let reason = match body[0] {
            0 => PortStatusReason::Add,
            1 => PortStatusReason::Delete,
            2 => PortStatusReason::Modify,
            other => return Err(malformed("port_status", format!("unknown reason {other}")).into()),
        };
        Ok(Self {
            reason,
            port: PhyPort::decode(&body[8..])?,
        })
    }
}

/// `OFPT_ERROR` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub kind: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl ErrorMsg {
    /// Transaction id of the rejected request, taken from the echoed header.
    pub fn offending_xid(&self) -> Option<u32> {
        (self.data.len() >= HEADER_SIZE).then(|| BigEndian::read_u32(&self.data[4..8]))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.kind);
        buf.put_u16(self.code);
        buf.put_slice(&self.data);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require("error", body, 4)?;
        Ok(Self {
            kind: BigEndian::read_u16(&body[0..2]),
            code: BigEndian::read_u16(&body[2..4]),
            data: body[4..].to_vec(),
        })
    }
}

/// Decoded OpenFlow message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfMessage {
    Hello,
    Error(ErrorMsg),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(FeaturesReply),
    PacketIn(PacketIn),
    PortStatus(PortStatus),
    FlowMod(FlowMod),
    PortMod(PortMod),
    BarrierRequest,
    BarrierReply,
    /// Valid header, body not modelled.
    Unsupported(u8),
    /// Valid header, body failed to decode. Never encoded by the controller.
    Malformed { kind: u8, reason: String },
}

impl OfMessage {
    /// Wire type byte.
    pub fn message_type(&self) -> u8 {
        let kind = match self {
            Self::Hello => MessageType::Hello,
            Self::Error(_) => MessageType::Error,
            Self::EchoRequest(_) => MessageType::EchoRequest,
            Self::EchoReply(_) => MessageType::EchoReply,
            Self::FeaturesRequest => MessageType::FeaturesRequest,
            Self::FeaturesReply(_) => MessageType::FeaturesReply,
            Self::PacketIn(_) => MessageType::PacketIn,
            Self::PortStatus(_) => MessageType::PortStatus,
            Self::FlowMod(_) => MessageType::FlowMod,
            Self::PortMod(_) => MessageType::PortMod,
            Self::BarrierRequest => MessageType::BarrierRequest,
            Self::BarrierReply => MessageType::BarrierReply,
            Self::Unsupported(kind) | Self::Malformed { kind, .. } => return *kind,
        };
        kind as u8
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Error(_) => "error",
            Self::EchoRequest(_) => "echo_request",
            Self::EchoReply(_) => "echo_reply",
            Self::FeaturesRequest => "features_request",
            Self::FeaturesReply(_) => "features_reply",
            Self::PacketIn(_) => "packet_in",
            Self::PortStatus(_) => "port_status",
            Self::FlowMod(_) => "flow_mod",
            Self::PortMod(_) => "port_mod",
            Self::BarrierRequest => "barrier_request",
            Self::BarrierReply => "barrier_reply",
            Self::Unsupported(_) => "unsupported",
            Self::Malformed { .. } => "malformed",
        }
    }

    /// Encode with header into `buf`.
    pub fn encode(&self, xid: u32, buf: &mut BytesMut) -> Result<()> {
        let start = buf.len();
        buf.put_u8(OFP_VERSION);
        buf.put_u8(self.message_type());
        buf.put_u16(0); // length, patched below
        buf.put_u32(xid);

        match self {
            Self::Hello
            | Self::FeaturesRequest
            | Self::BarrierRequest
            | Self::BarrierReply
            | Self::Unsupported(_)
            | Self::Malformed { .. } => {}
            Self::Error(err) => err.encode(buf),
            Self::EchoRequest(data) | Self::EchoReply(data) => buf.put_slice(data),
            Self::FeaturesReply(features) => features.encode(buf),
            Self::PacketIn(packet_in) => packet_in.encode(buf),
            Self::PortStatus(status) => status.encode(buf),
            Self::FlowMod(flow_mod) => flow_mod.encode(buf),
            Self::PortMod(port_mod) => port_mod.encode(buf),
        }

        let len = buf.len() - start;
        if len > super::MAX_MESSAGE_SIZE {
            buf.truncate(start);
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: super::MAX_MESSAGE_SIZE,
            }
            .into());
        }
        BigEndian::write_u16(&mut buf[start + 2..start + 4], len as u16);
        Ok(())
    }

    /// Decode one complete message (header included). Returns the xid and message.
    pub fn decode(buf: &[u8]) -> Result<(u32, Self)> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader.into());
        }
        if !super::is_compatible_version(buf[0]) {
            return Err(ProtocolError::InvalidVersion {
                expected: OFP_VERSION,
                got: buf[0],
            }
            .into());
        }
        let len = BigEndian::read_u16(&buf[2..4]) as usize;
        if len < HEADER_SIZE || buf.len() < len {
            return Err(ProtocolError::MalformedHeader.into());
        }
        let xid = BigEndian::read_u32(&buf[4..8]);
        let body = &buf[HEADER_SIZE..len];

        let message = match MessageType::from_u8(buf[1]) {
            Some(MessageType::Hello) => Self::Hello,
            Some(MessageType::Error) => Self::Error(ErrorMsg::decode(body)?),
            Some(MessageType::EchoRequest) => Self::EchoRequest(body.to_vec()),
            Some(MessageType::EchoReply) => Self::EchoReply(body.to_vec()),
            Some(MessageType::FeaturesRequest) => Self::FeaturesRequest,
            Some(MessageType::FeaturesReply) => Self::FeaturesReply(FeaturesReply::decode(body)?),
            Some(MessageType::PacketIn) => Self::PacketIn(PacketIn::decode(body)?),
            Some(MessageType::PortStatus) => Self::PortStatus(PortStatus::decode(body)?),
            Some(MessageType::FlowMod) => Self::FlowMod(FlowMod::decode(body)?),
            Some(MessageType::PortMod) => Self::PortMod(PortMod::decode(body)?),
            Some(MessageType::BarrierRequest) => Self::BarrierRequest,
            Some(MessageType::BarrierReply) => Self::BarrierReply,
            _ => Self::Unsupported(buf[1]),
        };
        Ok((xid, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(message: &OfMessage, xid: u32) -> BytesMut {
        let mut buf = BytesMut::new();
        message.encode(xid, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_flow_mod_layout() {
        let flow_mod = FlowMod::add(OfMatch::any().in_port(3), 2, vec![Action::flood(), Action::controller()]);
        let buf = encode(&OfMessage::FlowMod(flow_mod), 7);

        // header + match + fixed fields + two output actions
        assert_eq!(buf.len(), 8 + 40 + 24 + 16);
        assert_eq!(BigEndian::read_u16(&buf[2..4]) as usize, buf.len());
        assert_eq!(buf[1], MessageType::FlowMod as u8);
        assert_eq!(BigEndian::read_u32(&buf[4..8]), 7);

        let wildcards = BigEndian::read_u32(&buf[8..12]);
        assert_eq!(wildcards & wildcard::IN_PORT, 0);
        assert_ne!(wildcards & wildcard::DL_DST, 0);
        assert_eq!(wildcards & wildcard::NW_SRC_MASK, wildcard::NW_SRC_ALL);
        assert_eq!(BigEndian::read_u16(&buf[12..14]), 3);
    }

    #[test]
    fn test_flow_mod_display() {
        let pin = FlowMod::add(
            OfMatch::any().ipv4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 5)),
            256,
            vec![Action::output(2)],
        )
        .with_timeouts(30, 0);
        assert_eq!(
            pin.to_string(),
            "add priority=256 match=dl_type=ipv4,nw_src=10.0.0.1,nw_dst=10.0.0.5 actions=output:2 idle=30s hard=0s"
        );
        assert_eq!(FlowMod::delete_all().to_string(), "delete priority=0 match=*");
        assert_eq!(
            FlowMod::add(OfMatch::any(), 1, vec![Action::flood(), Action::controller()]).to_string(),
            "add priority=1 match=* actions=FLOOD,CONTROLLER"
        );
    }

    #[test]
    fn test_flow_mod_decodes_exact_ip_match() {
        let pattern = OfMatch::any()
            .ipv4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 5))
            .tcp_ports(40000, 9000);
        let flow_mod = FlowMod::add(pattern, 256, vec![Action::output(2)]).with_timeouts(60, 0);
        let buf = encode(&OfMessage::FlowMod(flow_mod.clone()), 1);

        let (xid, decoded) = OfMessage::decode(&buf).unwrap();
        assert_eq!(xid, 1);
        assert_eq!(decoded, OfMessage::FlowMod(flow_mod));
    }

    #[test]
    fn test_features_reply_ports() {
        let features = FeaturesReply {
            datapath_id: DatapathId(4),
            n_buffers: 256,
            n_tables: 1,
            capabilities: 0,
            actions: 0xfff,
            ports: vec![
                PhyPort::new(1, MacAddr([0, 0, 0, 0, 4, 1]), "s4-eth1"),
                PhyPort::new(2, MacAddr([0, 0, 0, 0, 4, 2]), "s4-eth2"),
            ],
        };
        let buf = encode(&OfMessage::FeaturesReply(features.clone()), 9);
        assert_eq!(buf.len(), 8 + 24 + 2 * PHY_PORT_SIZE);

        let (_, decoded) = OfMessage::decode(&buf).unwrap();
        assert_eq!(decoded, OfMessage::FeaturesReply(features));
    }

    #[test]
    fn test_port_mod_size() {
        let buf = encode(&OfMessage::PortMod(PortMod::no_flood(1, MacAddr([2; 6]))), 0);
        assert_eq!(buf.len(), 32);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut buf = encode(&OfMessage::Hello, 0);
        buf[0] = 0x04;
        assert!(matches!(
            OfMessage::decode(&buf),
            Err(crate::Error::Protocol(ProtocolError::InvalidVersion { got: 0x04, .. }))
        ));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let buf = [OFP_VERSION, 17, 0, 8, 0, 0, 0, 5];
        let (xid, msg) = OfMessage::decode(&buf).unwrap();
        assert_eq!(xid, 5);
        assert_eq!(msg, OfMessage::Unsupported(17));
    }

    #[test]
    fn test_error_offending_xid() {
        let mut rejected = BytesMut::new();
        OfMessage::FlowMod(FlowMod::delete_all()).encode(42, &mut rejected).unwrap();
        let err = ErrorMsg {
            kind: 3,
            code: 0,
            data: rejected[..12].to_vec(),
        };
        assert_eq!(err.offending_xid(), Some(42));
    }
}
