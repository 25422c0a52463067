//! Core types used throughout the controller.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// OpenFlow datapath identifier of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatapathId(pub u64);

impl DatapathId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl From<u64> for DatapathId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; 6]);
    pub const ZERO: Self = Self([0; 6]);

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(array))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set (includes broadcast).
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast() && *self != Self::ZERO
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| format!("MAC address too short: {s}"))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| format!("invalid MAC octet {part:?} in {s}"))?;
        }
        if parts.next().is_some() {
            return Err(format!("MAC address too long: {s}"));
        }
        Ok(Self(bytes))
    }
}

/// One of the two edge-disjoint paths through the diamond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rail {
    #[default]
    Top,
    Bottom,
}

impl Rail {
    pub const ALL: [Rail; 2] = [Rail::Top, Rail::Bottom];

    pub fn other(self) -> Self {
        match self {
            Rail::Top => Rail::Bottom,
            Rail::Bottom => Rail::Top,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Rail::Top => 0,
            Rail::Bottom => 1,
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rail::Top => write!(f, "top"),
            Rail::Bottom => write!(f, "bottom"),
        }
    }
}

impl FromStr for Rail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top" | "up" => Ok(Rail::Top),
            "bottom" | "down" => Ok(Rail::Bottom),
            other => Err(format!("unknown rail {other:?}")),
        }
    }
}

/// Unordered pair of participating hosts.
///
/// Stored normalized so `(a, b)` and `(b, a)` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostPair {
    low: Ipv4Addr,
    high: Ipv4Addr,
}

impl HostPair {
    pub fn new(a: Ipv4Addr, b: Ipv4Addr) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn first(&self) -> Ipv4Addr {
        self.low
    }

    pub fn second(&self) -> Ipv4Addr {
        self.high
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.low == addr || self.high == addr
    }
}

impl fmt::Display for HostPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

/// Application-supplied flow token from the side channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowToken(pub String);

impl FlowToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for FlowToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FlowToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of a flow record: host pair plus token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    pub hosts: HostPair,
    pub token: FlowToken,
}

impl FlowKey {
    pub fn new(a: Ipv4Addr, b: Ipv4Addr, token: impl Into<FlowToken>) -> Self {
        Self {
            hosts: HostPair::new(a, b),
            token: token.into(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.hosts, self.token)
    }
}

/// TCP endpoints of a flow, oriented from `client` to `server`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpEndpoints {
    pub client: Ipv4Addr,
    pub client_port: u16,
    pub server: Ipv4Addr,
    pub server_port: u16,
}

impl TcpEndpoints {
    /// Source port as seen in packets sent by `from`.
    pub fn src_port_from(&self, from: Ipv4Addr) -> u16 {
        if from == self.client {
            self.client_port
        } else {
            self.server_port
        }
    }

    /// Destination port as seen in packets sent by `from`.
    pub fn dst_port_from(&self, from: Ipv4Addr) -> u16 {
        if from == self.client {
            self.server_port
        } else {
            self.client_port
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_pair_is_unordered() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 5);
        assert_eq!(HostPair::new(a, b), HostPair::new(b, a));
        assert_eq!(HostPair::new(b, a).first(), a);
        assert!(HostPair::new(a, b).contains(b));
    }

    #[test]
    fn test_flow_key_identity() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 5);
        assert_eq!(FlowKey::new(a, b, "t1"), FlowKey::new(b, a, "t1"));
        assert_ne!(FlowKey::new(a, b, "t1"), FlowKey::new(a, b, "t2"));
    }

    #[test]
    fn test_mac_parse_display() {
        let mac: MacAddr = "00:00:00:00:00:0a".parse().unwrap();
        assert_eq!(mac, MacAddr([0, 0, 0, 0, 0, 0x0a]));
        assert_eq!(mac.to_string(), "00:00:00:00:00:0a");
        assert!(mac.is_unicast());
        assert!("00-11-22-33-44-55".parse::<MacAddr>().is_ok());
        assert!("00:11:22".parse::<MacAddr>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_classes() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(MacAddr::BROADCAST.is_multicast());
        assert!(MacAddr([0x01, 0x00, 0x5e, 0, 0, 1]).is_multicast());
        assert!(!MacAddr::ZERO.is_unicast());
    }

    #[test]
    fn test_rail_other() {
        assert_eq!(Rail::Top.other(), Rail::Bottom);
        assert_eq!(Rail::default(), Rail::Top);
        assert_eq!("down".parse::<Rail>().unwrap(), Rail::Bottom);
        assert_eq!(Rail::Bottom.to_string(), "bottom");
    }

    #[test]
    fn test_tcp_endpoint_orientation() {
        let ends = TcpEndpoints {
            client: Ipv4Addr::new(10, 0, 0, 1),
            client_port: 40000,
            server: Ipv4Addr::new(10, 0, 0, 5),
            server_port: 9000,
        };
        assert_eq!(ends.src_port_from(ends.server), 9000);
        assert_eq!(ends.dst_port_from(ends.server), 40000);
    }
}
