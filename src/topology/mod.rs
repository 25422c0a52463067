//! Static diamond topology model.
//!
//! The switch/port graph is fixed at startup. The configuration names the
//! four switches and their links; everything else (port bindings, which edge
//! port leads onto which rail) is derived and validated once. Any
//! inconsistency is a fatal [`TopologyError`].

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;
use crate::types::{DatapathId, Rail};

/// Highest usable physical port number in OpenFlow 1.0.
const MAX_PHYSICAL_PORT: u16 = 0xff00;

/// Role of a switch in the diamond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchRole {
    /// Switch with hosts attached and one link onto each rail.
    Edge,
    /// Switch carrying one rail between the two edges.
    Relay,
}

impl std::fmt::Display for SwitchRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchRole::Edge => write!(f, "edge"),
            SwitchRole::Relay => write!(f, "relay"),
        }
    }
}

/// Switch entry in the topology configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSpec {
    /// Datapath id reported by the switch.
    pub dpid: DatapathId,

    /// Human readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Edge or relay.
    pub role: SwitchRole,

    /// Rail carried by a relay switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rail: Option<Rail>,

    /// Hosts attached to an edge switch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<Ipv4Addr>,
}

/// One end of an inter-switch link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEnd {
    pub dpid: DatapathId,
    pub port: u16,
}

/// Inter-switch link in the topology configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: LinkEnd,
    pub b: LinkEnd,
}

/// Topology configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Rail used when no balancing decision exists, and on ties.
    #[serde(default)]
    pub default_rail: Rail,

    /// The four switches.
    #[serde(default)]
    pub switches: Vec<SwitchSpec>,

    /// The four inter-switch links.
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self::diamond(1)
    }
}

impl TopologyConfig {
    /// Reference diamond with `hosts_per_side` hosts on each edge.
    ///
    /// s1 and s4 are the edges, s2 carries the top rail and s3 the bottom
    /// rail. Hosts 10.0.0.1..=n hang off s1 and 10.0.0.n+1..=2n off s4.
    pub fn diamond(hosts_per_side: u8) -> Self {
        let n = hosts_per_side.min(127);
        let left = (1..=n).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect();
        let right = (n + 1..=2 * n).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect();

        let end = |dpid: u64, port: u16| LinkEnd {
            dpid: DatapathId(dpid),
            port,
        };

        Self {
            default_rail: Rail::Top,
            switches: vec![
                SwitchSpec {
                    dpid: DatapathId(1),
                    name: Some("s1".into()),
                    role: SwitchRole::Edge,
                    rail: None,
                    hosts: left,
                },
                SwitchSpec {
                    dpid: DatapathId(2),
                    name: Some("s2".into()),
                    role: SwitchRole::Relay,
                    rail: Some(Rail::Top),
                    hosts: vec![],
                },
                SwitchSpec {
                    dpid: DatapathId(3),
                    name: Some("s3".into()),
                    role: SwitchRole::Relay,
                    rail: Some(Rail::Bottom),
                    hosts: vec![],
                },
                SwitchSpec {
                    dpid: DatapathId(4),
                    name: Some("s4".into()),
                    role: SwitchRole::Edge,
                    rail: None,
                    hosts: right,
                },
            ],
            links: vec![
                LinkSpec { a: end(1, 1), b: end(2, 1) },
                LinkSpec { a: end(1, 2), b: end(3, 1) },
                LinkSpec { a: end(4, 2), b: end(2, 2) },
                LinkSpec { a: end(4, 1), b: end(3, 2) },
            ],
        }
    }

    /// Validate and build the runtime model.
    pub fn build(&self) -> Result<Topology, TopologyError> {
        Topology::from_config(self)
    }
}

/// What sits behind a switch port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    /// Another switch of the diamond.
    Switch { dpid: DatapathId, port: u16 },
    /// The host subnet of an edge switch.
    Hosts,
}

/// The two ports an edge switch uses to reach each rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailPorts {
    pub top: u16,
    pub bottom: u16,
}

impl RailPorts {
    pub fn port(&self, rail: Rail) -> u16 {
        match rail {
            Rail::Top => self.top,
            Rail::Bottom => self.bottom,
        }
    }

    pub fn rail_of(&self, port: u16) -> Option<Rail> {
        if port == self.top {
            Some(Rail::Top)
        } else if port == self.bottom {
            Some(Rail::Bottom)
        } else {
            None
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.rail_of(port).is_some()
    }
}

/// Role-specific wiring of a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchKind {
    Edge {
        rail_ports: RailPorts,
        hosts: Vec<Ipv4Addr>,
    },
    Relay {
        rail: Rail,
        /// Ports toward the two edges, ordered by edge dpid.
        ports: [u16; 2],
    },
}

/// Runtime view of one switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    pub dpid: DatapathId,
    pub name: String,
    pub kind: SwitchKind,
    links: BTreeMap<u16, Neighbor>,
}

impl Switch {
    pub fn role(&self) -> SwitchRole {
        match self.kind {
            SwitchKind::Edge { .. } => SwitchRole::Edge,
            SwitchKind::Relay { .. } => SwitchRole::Relay,
        }
    }

    pub fn is_edge(&self) -> bool {
        self.role() == SwitchRole::Edge
    }

    pub fn rail_ports(&self) -> Option<RailPorts> {
        match self.kind {
            SwitchKind::Edge { rail_ports, .. } => Some(rail_ports),
            SwitchKind::Relay { .. } => None,
        }
    }

    pub fn hosts(&self) -> &[Ipv4Addr] {
        match &self.kind {
            SwitchKind::Edge { hosts, .. } => hosts,
            SwitchKind::Relay { .. } => &[],
        }
    }

    /// Neighbor behind `port`. Unlinked edge ports face the hosts.
    pub fn neighbor(&self, port: u16) -> Option<Neighbor> {
        match self.links.get(&port) {
            Some(neighbor) => Some(*neighbor),
            None if self.is_edge() => Some(Neighbor::Hosts),
            None => None,
        }
    }

    /// Inter-switch ports in ascending order.
    pub fn switch_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.links.keys().copied()
    }
}

/// Validated, immutable diamond topology.
#[derive(Debug, Clone)]
pub struct Topology {
    switches: BTreeMap<DatapathId, Switch>,
    host_edges: HashMap<Ipv4Addr, DatapathId>,
    edges: [DatapathId; 2],
    relays: [DatapathId; 2],
    default_rail: Rail,
}

impl Topology {
    /// Build the topology from configuration, checking every invariant.
    pub fn from_config(config: &TopologyConfig) -> Result<Self, TopologyError> {
        let mut specs: BTreeMap<DatapathId, &SwitchSpec> = BTreeMap::new();
        for spec in &config.switches {
            if specs.insert(spec.dpid, spec).is_some() {
                return Err(TopologyError::DuplicateSwitch(spec.dpid));
            }
        }

        let edges: Vec<DatapathId> = specs
            .values()
            .filter(|s| s.role == SwitchRole::Edge)
            .map(|s| s.dpid)
            .collect();
        let relays: Vec<DatapathId> = specs
            .values()
            .filter(|s| s.role == SwitchRole::Relay)
            .map(|s| s.dpid)
            .collect();

        let edges: [DatapathId; 2] = edges.try_into().map_err(|v: Vec<_>| TopologyError::RoleCount {
            role: "edge",
            expected: 2,
            found: v.len(),
        })?;
        let relays: [DatapathId; 2] = relays.try_into().map_err(|v: Vec<_>| TopologyError::RoleCount {
            role: "relay",
            expected: 2,
            found: v.len(),
        })?;

        // Relay rails
        let mut relay_rails: HashMap<DatapathId, Rail> = HashMap::new();
        for dpid in relays {
            let spec = specs[&dpid];
            let rail = spec.rail.ok_or(TopologyError::RelayWithoutRail(dpid))?;
            if relay_rails.values().any(|r| *r == rail) {
                return Err(TopologyError::DuplicateRail(rail.to_string()));
            }
            if !spec.hosts.is_empty() {
                return Err(TopologyError::UnexpectedHosts("relay", dpid));
            }
            relay_rails.insert(dpid, rail);
        }

        // Hosts
        let mut host_edges = HashMap::new();
        for dpid in edges {
            let spec = specs[&dpid];
            if spec.hosts.is_empty() {
                return Err(TopologyError::NoHosts(dpid));
            }
            for host in &spec.hosts {
                if host_edges.insert(*host, dpid).is_some() {
                    return Err(TopologyError::DuplicateHost(IpAddr::V4(*host)));
                }
            }
        }

        // Links
        let mut links: HashMap<DatapathId, BTreeMap<u16, Neighbor>> = HashMap::new();
        for link in &config.links {
            for end in [link.a, link.b] {
                if !specs.contains_key(&end.dpid) {
                    return Err(TopologyError::UnknownSwitch(end.dpid));
                }
                if end.port == 0 || end.port > MAX_PHYSICAL_PORT {
                    return Err(TopologyError::ReservedPort {
                        dpid: end.dpid,
                        port: end.port,
                    });
                }
            }

            let role_a = specs[&link.a.dpid].role;
            let role_b = specs[&link.b.dpid].role;
            if role_a == role_b {
                return Err(TopologyError::InvalidLink {
                    a: link.a.dpid,
                    b: link.b.dpid,
                    reason: format!("{role_a} switches cannot be linked to each other"),
                });
            }

            for (near, far) in [(link.a, link.b), (link.b, link.a)] {
                let ports = links.entry(near.dpid).or_default();
                let neighbor = Neighbor::Switch {
                    dpid: far.dpid,
                    port: far.port,
                };
                if ports.insert(near.port, neighbor).is_some() {
                    return Err(TopologyError::PortReused {
                        dpid: near.dpid,
                        port: near.port,
                    });
                }
            }
        }

        let mut switches = BTreeMap::new();

        for dpid in relays {
            let ports = links.remove(&dpid).unwrap_or_default();
            let mut toward: [Option<u16>; 2] = [None, None];
            for (port, neighbor) in &ports {
                if let Neighbor::Switch { dpid: peer, .. } = neighbor {
                    if let Some(i) = edges.iter().position(|e| e == peer) {
                        if toward[i].replace(*port).is_some() {
                            return Err(TopologyError::IncompleteRelay(dpid));
                        }
                    }
                }
            }
            let (Some(west), Some(east)) = (toward[0], toward[1]) else {
                return Err(TopologyError::IncompleteRelay(dpid));
            };

            switches.insert(
                dpid,
                Switch {
                    dpid,
                    name: specs[&dpid].name.clone().unwrap_or_else(|| dpid.to_string()),
                    kind: SwitchKind::Relay {
                        rail: relay_rails[&dpid],
                        ports: [west, east],
                    },
                    links: ports,
                },
            );
        }

        for dpid in edges {
            let ports = links.remove(&dpid).unwrap_or_default();
            let mut top = None;
            let mut bottom = None;
            for (port, neighbor) in &ports {
                if let Neighbor::Switch { dpid: peer, .. } = neighbor {
                    let slot = match relay_rails.get(peer) {
                        Some(Rail::Top) => &mut top,
                        Some(Rail::Bottom) => &mut bottom,
                        None => continue,
                    };
                    if slot.replace(*port).is_some() {
                        return Err(TopologyError::InvalidLink {
                            a: dpid,
                            b: *peer,
                            reason: "edge switch linked to the same relay twice".into(),
                        });
                    }
                }
            }
            let top = top.ok_or_else(|| TopologyError::MissingRailLink {
                edge: dpid,
                rail: Rail::Top.to_string(),
            })?;
            let bottom = bottom.ok_or_else(|| TopologyError::MissingRailLink {
                edge: dpid,
                rail: Rail::Bottom.to_string(),
            })?;

            let spec = specs[&dpid];
            switches.insert(
                dpid,
                Switch {
                    dpid,
                    name: spec.name.clone().unwrap_or_else(|| dpid.to_string()),
                    kind: SwitchKind::Edge {
                        rail_ports: RailPorts { top, bottom },
                        hosts: spec.hosts.clone(),
                    },
                    links: ports,
                },
            );
        }

        Ok(Self {
            switches,
            host_edges,
            edges,
            relays,
            default_rail: config.default_rail,
        })
    }

    /// Look up a switch by datapath id.
    pub fn switch(&self, dpid: DatapathId) -> Option<&Switch> {
        self.switches.get(&dpid)
    }

    /// All switches in dpid order.
    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.values()
    }

    /// The two edge switches.
    pub fn edges(&self) -> [DatapathId; 2] {
        self.edges
    }

    /// The two relay switches.
    pub fn relays(&self) -> [DatapathId; 2] {
        self.relays
    }

    /// Relay switch carrying `rail`.
    pub fn relay_for(&self, rail: Rail) -> Option<DatapathId> {
        self.relays.iter().copied().find(|dpid| {
            matches!(
                self.switches.get(dpid).map(|s| &s.kind),
                Some(SwitchKind::Relay { rail: r, .. }) if *r == rail
            )
        })
    }

    /// Rail used when no balancer decision exists.
    pub fn default_rail(&self) -> Rail {
        self.default_rail
    }

    /// Edge switch a host is attached to.
    pub fn edge_for_host(&self, host: Ipv4Addr) -> Option<DatapathId> {
        self.host_edges.get(&host).copied()
    }

    /// Whether `addr` belongs to a host of the diamond.
    pub fn is_known_host(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => self.host_edges.contains_key(&v4),
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .is_some_and(|v4| self.host_edges.contains_key(&v4)),
        }
    }

    /// Number of hosts across both edges.
    pub fn host_count(&self) -> usize {
        self.host_edges.len()
    }

    /// Port on edge switch `edge` leading onto `rail`.
    pub fn rail_port(&self, edge: DatapathId, rail: Rail) -> Option<u16> {
        self.switch(edge)?.rail_ports().map(|p| p.port(rail))
    }

    /// Port binding for `(dpid, port)`.
    pub fn neighbor(&self, dpid: DatapathId, port: u16) -> Option<Neighbor> {
        self.switch(dpid)?.neighbor(port)
    }

    /// Multi-line human readable description.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for switch in self.switches() {
            match &switch.kind {
                SwitchKind::Edge { rail_ports, hosts } => {
                    out.push_str(&format!(
                        "{} ({}) edge: top via port {}, bottom via port {}, {} hosts\n",
                        switch.name,
                        switch.dpid,
                        rail_ports.top,
                        rail_ports.bottom,
                        hosts.len()
                    ));
                }
                SwitchKind::Relay { rail, ports } => {
                    out.push_str(&format!(
                        "{} ({}) relay: {} rail, ports {} <-> {}\n",
                        switch.name, switch.dpid, rail, ports[0], ports[1]
                    ));
                }
            }
        }
        out.push_str(&format!("default rail: {}\n", self.default_rail));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_diamond() {
        let topo = TopologyConfig::diamond(3).build().unwrap();

        assert_eq!(topo.edges(), [DatapathId(1), DatapathId(4)]);
        assert_eq!(topo.relays(), [DatapathId(2), DatapathId(3)]);
        assert_eq!(topo.host_count(), 6);

        assert_eq!(topo.rail_port(DatapathId(1), Rail::Top), Some(1));
        assert_eq!(topo.rail_port(DatapathId(1), Rail::Bottom), Some(2));
        assert_eq!(topo.rail_port(DatapathId(4), Rail::Top), Some(2));
        assert_eq!(topo.rail_port(DatapathId(4), Rail::Bottom), Some(1));
        assert_eq!(topo.relay_for(Rail::Bottom), Some(DatapathId(3)));

        assert_eq!(topo.edge_for_host(Ipv4Addr::new(10, 0, 0, 3)), Some(DatapathId(1)));
        assert_eq!(topo.edge_for_host(Ipv4Addr::new(10, 0, 0, 4)), Some(DatapathId(4)));
        assert_eq!(topo.edge_for_host(Ipv4Addr::new(10, 0, 0, 7)), None);
    }

    #[test]
    fn test_port_bindings() {
        let topo = TopologyConfig::diamond(1).build().unwrap();

        assert_eq!(
            topo.neighbor(DatapathId(1), 1),
            Some(Neighbor::Switch {
                dpid: DatapathId(2),
                port: 1
            })
        );
        assert_eq!(topo.neighbor(DatapathId(1), 3), Some(Neighbor::Hosts));
        assert_eq!(topo.neighbor(DatapathId(2), 3), None);

        let relay = topo.switch(DatapathId(3)).unwrap();
        assert_eq!(
            relay.kind,
            SwitchKind::Relay {
                rail: Rail::Bottom,
                ports: [1, 2]
            }
        );
    }

    #[test]
    fn test_rejects_duplicate_rail() {
        let mut config = TopologyConfig::diamond(1);
        config.switches[2].rail = Some(Rail::Top);
        assert_eq!(
            config.build().unwrap_err(),
            TopologyError::DuplicateRail("top".into())
        );
    }

    #[test]
    fn test_rejects_link_to_unknown_switch() {
        let mut config = TopologyConfig::diamond(1);
        config.links[0].b.dpid = DatapathId(9);
        assert_eq!(
            config.build().unwrap_err(),
            TopologyError::UnknownSwitch(DatapathId(9))
        );
    }

    #[test]
    fn test_rejects_missing_rail_link() {
        let mut config = TopologyConfig::diamond(1);
        config.links.remove(1);
        assert!(matches!(
            config.build().unwrap_err(),
            TopologyError::IncompleteRelay(_) | TopologyError::MissingRailLink { .. }
        ));
    }

    #[test]
    fn test_rejects_reused_port() {
        let mut config = TopologyConfig::diamond(1);
        config.links[1].a.port = 1;
        assert_eq!(
            config.build().unwrap_err(),
            TopologyError::PortReused {
                dpid: DatapathId(1),
                port: 1
            }
        );
    }

    #[test]
    fn test_rejects_duplicate_host() {
        let mut config = TopologyConfig::diamond(2);
        config.switches[3].hosts.push(Ipv4Addr::new(10, 0, 0, 1));
        assert!(matches!(
            config.build().unwrap_err(),
            TopologyError::DuplicateHost(_)
        ));
    }

    #[test]
    fn test_rejects_wrong_role_count() {
        let mut config = TopologyConfig::diamond(1);
        config.switches.pop();
        assert_eq!(
            config.build().unwrap_err(),
            TopologyError::RoleCount {
                role: "edge",
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_rejects_edge_to_edge_link() {
        let mut config = TopologyConfig::diamond(1);
        config.links.push(LinkSpec {
            a: LinkEnd { dpid: DatapathId(1), port: 9 },
            b: LinkEnd { dpid: DatapathId(4), port: 9 },
        });
        assert!(matches!(
            config.build().unwrap_err(),
            TopologyError::InvalidLink { .. }
        ));
    }

    #[test]
    fn test_known_host_accepts_mapped_v6() {
        let topo = TopologyConfig::diamond(1).build().unwrap();
        let mapped: IpAddr = "::ffff:10.0.0.2".parse().unwrap();
        assert!(topo.is_known_host(mapped));
        assert!(!topo.is_known_host("192.168.1.1".parse().unwrap()));
    }
}
