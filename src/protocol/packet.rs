//! Data-plane frame parsing for packet-in payloads.
//!
//! The router only needs the Ethernet addresses; the IPv4 and ARP views
//! are used for logging and for recognising broadcast-driven traffic.

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::types::MacAddr;

const ETHERNET_HEADER: usize = 14;
const VLAN_TAG: usize = 4;

/// Ethernet payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtherType {
    Ipv4,
    Arp,
    Ipv6,
    Lldp,
    Other(u16),
}

impl EtherType {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const VLAN: u16 = 0x8100;
    pub const IPV6: u16 = 0x86dd;
    pub const LLDP: u16 = 0x88cc;

    pub fn from_u16(v: u16) -> Self {
        match v {
            Self::IPV4 => Self::Ipv4,
            Self::ARP => Self::Arp,
            Self::IPV6 => Self::Ipv6,
            Self::LLDP => Self::Lldp,
            other => Self::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::Ipv4 => Self::IPV4,
            Self::Arp => Self::ARP,
            Self::Ipv6 => Self::IPV6,
            Self::Lldp => Self::LLDP,
            Self::Other(v) => v,
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Arp => write!(f, "arp"),
            Self::Ipv6 => write!(f, "ipv6"),
            Self::Lldp => write!(f, "lldp"),
            Self::Other(v) => write!(f, "{v:#06x}"),
        }
    }
}

/// IPv4 header fields relevant to flow matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    /// Source port, if TCP or UDP.
    pub src_port: Option<u16>,
    /// Destination port, if TCP or UDP.
    pub dst_port: Option<u16>,
}

impl Ipv4Header {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 20 || data[0] >> 4 != 4 {
            return None;
        }
        let header_len = (data[0] & 0x0f) as usize * 4;
        if header_len < 20 || data.len() < header_len {
            return None;
        }
        let protocol = data[9];
        let ports = match protocol {
            6 | 17 if data.len() >= header_len + 4 => Some((
                BigEndian::read_u16(&data[header_len..header_len + 2]),
                BigEndian::read_u16(&data[header_len + 2..header_len + 4]),
            )),
            _ => None,
        };
        Some(Self {
            src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            protocol,
            src_port: ports.map(|(s, _)| s),
            dst_port: ports.map(|(_, d)| d),
        })
    }
}

/// ARP over Ethernet/IPv4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub const REQUEST: u16 = 1;
    pub const REPLY: u16 = 2;

    fn parse(data: &[u8]) -> Option<Self> {
        // htype 1, ptype IPv4, hlen 6, plen 4
        if data.len() < 28 || data[4] != 6 || data[5] != 4 {
            return None;
        }
        Some(Self {
            operation: BigEndian::read_u16(&data[6..8]),
            sender_mac: MacAddr::from_slice(&data[8..14])?,
            sender_ip: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            target_mac: MacAddr::from_slice(&data[18..24])?,
            target_ip: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
        })
    }
}

/// Parsed network layer, when recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3 {
    Ipv4(Ipv4Header),
    Arp(ArpPacket),
    Other,
}

/// Ethernet frame carried in a packet-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub vlan: Option<u16>,
    pub ethertype: EtherType,
    pub l3: L3,
}

impl EthernetFrame {
    /// Parse a frame. Only the Ethernet header is required to be intact.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ETHERNET_HEADER {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame is {} bytes, shorter than an Ethernet header",
                data.len()
            ))
            .into());
        }

        let dst = MacAddr::from_slice(&data[0..6]).unwrap_or_default();
        let src = MacAddr::from_slice(&data[6..12]).unwrap_or_default();
        let mut ethertype = BigEndian::read_u16(&data[12..14]);
        let mut offset = ETHERNET_HEADER;
        let mut vlan = None;

        if ethertype == EtherType::VLAN {
            if data.len() < ETHERNET_HEADER + VLAN_TAG {
                return Err(ProtocolError::MalformedFrame("truncated VLAN tag".into()).into());
            }
            vlan = Some(BigEndian::read_u16(&data[14..16]) & 0x0fff);
            ethertype = BigEndian::read_u16(&data[16..18]);
            offset += VLAN_TAG;
        }

        let ethertype = EtherType::from_u16(ethertype);
        let payload = &data[offset..];
        let l3 = match ethertype {
            EtherType::Ipv4 => Ipv4Header::parse(payload).map_or(L3::Other, L3::Ipv4),
            EtherType::Arp => ArpPacket::parse(payload).map_or(L3::Other, L3::Arp),
            _ => L3::Other,
        };

        Ok(Self {
            dst,
            src,
            vlan,
            ethertype,
            l3,
        })
    }

    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        match &self.l3 {
            L3::Ipv4(header) => Some(header),
            _ => None,
        }
    }

    pub fn arp(&self) -> Option<&ArpPacket> {
        match &self.l3 {
            L3::Arp(arp) => Some(arp),
            _ => None,
        }
    }

    /// Build an untagged IPv4/TCP frame with an empty payload.
    pub fn build_tcp(
        src_mac: MacAddr,
        dst_mac: MacAddr,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(ETHERNET_HEADER + 40);
        buf.put_slice(&dst_mac.octets());
        buf.put_slice(&src_mac.octets());
        buf.put_u16(EtherType::IPV4);

        buf.put_u8(0x45);
        buf.put_u8(0);
        buf.put_u16(40); // total length
        buf.put_u32(0); // id, flags, fragment
        buf.put_u8(64);
        buf.put_u8(6);
        buf.put_u16(0); // checksum
        buf.put_slice(&src.octets());
        buf.put_slice(&dst.octets());

        buf.put_u16(src_port);
        buf.put_u16(dst_port);
        buf.put_u32(0); // seq
        buf.put_u32(0); // ack
        buf.put_u8(5 << 4);
        buf.put_u8(0x02); // SYN
        buf.put_u16(0xffff);
        buf.put_u32(0); // checksum, urgent
        buf.to_vec()
    }

    /// Build a broadcast ARP request.
    pub fn build_arp_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(ETHERNET_HEADER + 28);
        buf.put_slice(&MacAddr::BROADCAST.octets());
        buf.put_slice(&sender_mac.octets());
        buf.put_u16(EtherType::ARP);

        buf.put_u16(1);
        buf.put_u16(EtherType::IPV4);
        buf.put_u8(6);
        buf.put_u8(4);
        buf.put_u16(ArpPacket::REQUEST);
        buf.put_slice(&sender_mac.octets());
        buf.put_slice(&sender_ip.octets());
        buf.put_slice(&MacAddr::ZERO.octets());
        buf.put_slice(&target_ip.octets());
        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_parse_tcp_frame() {
        let data = EthernetFrame::build_tcp(
            mac(1),
            mac(5),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 5),
            40000,
            9000,
        );
        let frame = EthernetFrame::parse(&data).unwrap();
        assert_eq!(frame.src, mac(1));
        assert_eq!(frame.dst, mac(5));
        assert_eq!(frame.ethertype, EtherType::Ipv4);

        let ip = frame.ipv4().unwrap();
        assert_eq!(ip.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip.protocol, 6);
        assert_eq!(ip.src_port, Some(40000));
        assert_eq!(ip.dst_port, Some(9000));
    }

    #[test]
    fn test_parse_arp_request() {
        let data = EthernetFrame::build_arp_request(mac(2), Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 6));
        let frame = EthernetFrame::parse(&data).unwrap();
        assert!(frame.dst.is_broadcast());
        let arp = frame.arp().unwrap();
        assert_eq!(arp.operation, ArpPacket::REQUEST);
        assert_eq!(arp.sender_mac, mac(2));
        assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 6));
    }

    #[test]
    fn test_parse_vlan_tagged() {
        let plain = EthernetFrame::build_arp_request(mac(3), Ipv4Addr::new(10, 0, 0, 3), Ipv4Addr::new(10, 0, 0, 1));
        let mut tagged = plain[..12].to_vec();
        tagged.extend_from_slice(&[0x81, 0x00, 0x00, 0x0a]);
        tagged.extend_from_slice(&plain[12..]);

        let frame = EthernetFrame::parse(&tagged).unwrap();
        assert_eq!(frame.vlan, Some(10));
        assert_eq!(frame.ethertype, EtherType::Arp);
        assert!(frame.arp().is_some());
    }

    #[test]
    fn test_truncated_l3_still_parses() {
        let data = EthernetFrame::build_tcp(mac(1), mac(2), Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, 1, 2);
        let frame = EthernetFrame::parse(&data[..20]).unwrap();
        assert_eq!(frame.src, mac(1));
        assert_eq!(frame.l3, L3::Other);
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(EthernetFrame::parse(&[0u8; 10]).is_err());
    }
}
