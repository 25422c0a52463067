//! MAC-learning router for the diamond.
//!
//! Edge switches get a baseline that floods host traffic and copies it onto
//! the default rail, with both rail ports excluded from flooding so nothing
//! loops back around the diamond. Relays just patch their two ports together.
//! As packets reach the controller, source MACs are learned and per-host rules
//! take over from the baseline.

mod mac_table;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use mac_table::{Learned, MacEntry, MacTable};

use crate::config::RulesConfig;
use crate::controller::{ControllerEvent, EventHandler};
use crate::error::{Result, SwitchError};
use crate::protocol::{
    Action, EtherType, EthernetFrame, FlowMod, OfMatch, OfMessage, PacketIn, PhyPort, PortMod,
    PortStatus, PortStatusReason,
};
use crate::switch::SwitchRegistry;
use crate::topology::{RailPorts, SwitchKind, Topology};
use crate::types::{DatapathId, MacAddr};

/// Flow rule priorities. Higher wins.
pub mod priority {
    /// Catch-all on edge switches.
    pub const FLOOD_FORWARD_ALWAYS: u16 = 1;
    /// Traffic arriving over a rail.
    pub const FLOOD_IF_PORT: u16 = 2;
    pub const SEND_FROM_MAC: u16 = 3;
    pub const BROADCAST_FROM_LOCAL: u16 = 253;
    pub const BROADCAST_FROM_OTHER: u16 = 254;
    pub const SEND_TO_MAC: u16 = 255;
    /// Balancer per-flow rules.
    pub const ROUTE_CONNECTION: u16 = 256;
}

#[derive(Debug, Default, Clone, Copy)]
struct RouterStats {
    packets: u64,
    rules: u64,
}

/// Router event handler.
pub struct Router {
    topology: Arc<Topology>,
    switches: Arc<SwitchRegistry>,
    macs: MacTable,
    ports: HashMap<DatapathId, BTreeMap<u16, PhyPort>>,
    pending_no_flood: HashMap<DatapathId, BTreeSet<u16>>,
    /// SEND_TO_MAC rules currently on each switch, with their output port.
    installed: HashMap<DatapathId, HashMap<MacAddr, u16>>,
    mac_idle_timeout: u16,
    stats: RouterStats,
}

impl Router {
    pub fn new(topology: Arc<Topology>, switches: Arc<SwitchRegistry>, rules: &RulesConfig) -> Self {
        Self {
            topology,
            switches,
            macs: MacTable::new(),
            ports: HashMap::new(),
            pending_no_flood: HashMap::new(),
            installed: HashMap::new(),
            mac_idle_timeout: rules.mac_idle_secs(),
            stats: RouterStats::default(),
        }
    }

    pub fn mac_table(&self) -> &MacTable {
        &self.macs
    }

    /// Port a packet for `mac` would leave `dpid` through, if the MAC is known.
    pub fn forwarding_port(&self, dpid: DatapathId, mac: MacAddr) -> Option<u16> {
        let rail_ports = self.topology.switch(dpid)?.rail_ports()?;
        let port = self.macs.lookup(dpid, mac)?;
        Some(self.forward_port(rail_ports, port))
    }

    /// Rail ports still waiting for a hardware address before NO_FLOOD can be set.
    pub fn pending_no_flood(&self, dpid: DatapathId) -> Vec<u16> {
        self.pending_no_flood
            .get(&dpid)
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    fn install(&mut self, dpid: DatapathId, message: OfMessage) {
        match self.switches.send(dpid, message) {
            Ok(_) => self.stats.rules += 1,
            Err(e) => warn!(%dpid, error = %e, "instruction not delivered"),
        }
    }

    fn add_flow(&mut self, dpid: DatapathId, pattern: OfMatch, priority: u16, actions: Vec<Action>) {
        let flow_mod = FlowMod::add(pattern, priority, actions);
        self.install(dpid, OfMessage::FlowMod(flow_mod));
    }

    /// Learned MACs behind a rail are reached through the default rail.
    fn forward_port(&self, rail_ports: RailPorts, port: u16) -> u16 {
        if rail_ports.contains(port) {
            rail_ports.port(self.topology.default_rail())
        } else {
            port
        }
    }

    fn switch_joined(&mut self, dpid: DatapathId, ports: &[PhyPort]) {
        let Some(switch) = self.topology.switch(dpid) else {
            warn!(%dpid, "unknown switch joined, ignoring");
            return;
        };
        let kind = switch.kind.clone();
        let name = switch.name.clone();

        self.ports
            .insert(dpid, ports.iter().map(|p| (p.port_no, p.clone())).collect());
        self.pending_no_flood.remove(&dpid);
        self.installed.remove(&dpid);

        match kind {
            SwitchKind::Edge { rail_ports, .. } => {
                info!(%dpid, %name, ports = ports.len(), "edge switch joined");
                self.edge_baseline(dpid, rail_ports);
                self.restore_learned(dpid, rail_ports);
            }
            SwitchKind::Relay { rail, ports: [a, b] } => {
                info!(%dpid, %name, %rail, "relay switch joined");
                self.install(dpid, OfMessage::FlowMod(FlowMod::delete_all()));
                self.add_flow(dpid, OfMatch::any().in_port(a), priority::FLOOD_IF_PORT, vec![Action::output(b)]);
                self.add_flow(dpid, OfMatch::any().in_port(b), priority::FLOOD_IF_PORT, vec![Action::output(a)]);
            }
        }
    }

    fn edge_baseline(&mut self, dpid: DatapathId, rail_ports: RailPorts) {
        let default_port = rail_ports.port(self.topology.default_rail());
        let rails = [rail_ports.top, rail_ports.bottom];

        self.install(dpid, OfMessage::FlowMod(FlowMod::delete_all()));
        for port in rails {
            self.mark_no_flood(dpid, port);
        }

        self.add_flow(
            dpid,
            OfMatch::any(),
            priority::FLOOD_FORWARD_ALWAYS,
            vec![Action::flood(), Action::output(default_port), Action::controller()],
        );
        for port in rails {
            self.add_flow(
                dpid,
                OfMatch::any().in_port(port),
                priority::FLOOD_IF_PORT,
                vec![Action::flood(), Action::controller()],
            );
        }

        self.add_flow(
            dpid,
            OfMatch::any().dl_dst(MacAddr::BROADCAST),
            priority::BROADCAST_FROM_LOCAL,
            vec![Action::flood(), Action::output(default_port)],
        );
        for port in rails {
            self.add_flow(
                dpid,
                OfMatch::any().in_port(port).dl_dst(MacAddr::BROADCAST),
                priority::BROADCAST_FROM_OTHER,
                vec![Action::flood()],
            );
        }
    }

    fn mark_no_flood(&mut self, dpid: DatapathId, port: u16) {
        let hw_addr = self
            .ports
            .get(&dpid)
            .and_then(|ports| ports.get(&port))
            .map(|p| p.hw_addr);

        match hw_addr {
            Some(hw_addr) => self.install(dpid, OfMessage::PortMod(PortMod::no_flood(port, hw_addr))),
            None => {
                debug!(error = %SwitchError::MissingPort { dpid, port }, "deferring NO_FLOOD until the port appears");
                self.pending_no_flood.entry(dpid).or_default().insert(port);
            }
        }
    }

    /// Reinstall per-host rules after a switch reconnects with an empty table.
    fn restore_learned(&mut self, dpid: DatapathId, rail_ports: RailPorts) {
        let known: Vec<(MacAddr, u16)> = self.macs.entries(dpid).map(|(mac, e)| (*mac, e.port)).collect();
        for (mac, port) in known {
            self.install_mac_rules(dpid, rail_ports, mac, port);
        }
    }

    fn port_status(&mut self, dpid: DatapathId, status: &PortStatus) {
        if self.topology.switch(dpid).is_none() {
            warn!(%dpid, "port status from unknown switch ignored");
            return;
        }
        let port_no = status.port.port_no;
        debug!(%dpid, port = port_no, reason = ?status.reason, "port status");

        match status.reason {
            PortStatusReason::Delete => {
                if let Some(ports) = self.ports.get_mut(&dpid) {
                    ports.remove(&port_no);
                }
            }
            PortStatusReason::Add | PortStatusReason::Modify => {
                let hw_addr = status.port.hw_addr;
                self.ports.entry(dpid).or_default().insert(port_no, status.port.clone());

                let was_pending = self
                    .pending_no_flood
                    .get_mut(&dpid)
                    .is_some_and(|pending| pending.remove(&port_no));
                if was_pending {
                    info!(%dpid, port = port_no, "rail port appeared, disabling flooding");
                    self.install(dpid, OfMessage::PortMod(PortMod::no_flood(port_no, hw_addr)));
                }
            }
        }
    }

    fn install_send_to(&mut self, dpid: DatapathId, mac: MacAddr, out_port: u16) {
        let flow_mod = FlowMod::add(OfMatch::any().dl_dst(mac), priority::SEND_TO_MAC, vec![Action::output(out_port)])
            .with_timeouts(self.mac_idle_timeout, 0);
        self.install(dpid, OfMessage::FlowMod(flow_mod));
        self.installed.entry(dpid).or_default().insert(mac, out_port);
    }

    fn install_mac_rules(&mut self, dpid: DatapathId, rail_ports: RailPorts, mac: MacAddr, in_port: u16) {
        let out_port = self.forward_port(rail_ports, in_port);
        self.install_send_to(dpid, mac, out_port);

        let actions = if rail_ports.contains(in_port) {
            vec![Action::flood()]
        } else {
            vec![Action::flood(), Action::output(rail_ports.port(self.topology.default_rail()))]
        };
        let flow_mod = FlowMod::add(OfMatch::any().dl_src(mac), priority::SEND_FROM_MAC, actions)
            .with_timeouts(self.mac_idle_timeout, 0);
        self.install(dpid, OfMessage::FlowMod(flow_mod));
    }

    fn packet_in(&mut self, dpid: DatapathId, packet: &PacketIn) -> Result<()> {
        let Some(switch) = self.topology.switch(dpid) else {
            warn!(%dpid, "packet-in from unknown switch ignored");
            return Ok(());
        };
        let Some(rail_ports) = switch.rail_ports() else {
            debug!(%dpid, "packet-in from relay ignored");
            return Ok(());
        };
        self.stats.packets += 1;

        let frame = EthernetFrame::parse(&packet.data)?;
        let in_port = packet.in_port;
        debug!(%dpid, in_port, src = %frame.src, dst = %frame.dst, ethertype = %frame.ethertype, "packet-in");

        if frame.ethertype == EtherType::Ipv4 && frame.src.is_unicast() {
            let learned = self.macs.learn(dpid, frame.src, in_port);
            if learned.changed() {
                debug!(%dpid, mac = %frame.src, port = in_port, ?learned, "learned MAC");
                self.install_mac_rules(dpid, rail_ports, frame.src, in_port);
            }
        }

        if frame.dst.is_unicast() {
            if let Some(port) = self.macs.lookup(dpid, frame.dst) {
                let out_port = self.forward_port(rail_ports, port);
                let current = self.installed.get(&dpid).and_then(|m| m.get(&frame.dst)).copied();
                if current != Some(out_port) {
                    self.install_send_to(dpid, frame.dst, out_port);
                }
            }
        }

        Ok(())
    }
}

impl EventHandler for Router {
    fn name(&self) -> &'static str {
        "router"
    }

    fn handle(&mut self, event: &ControllerEvent) -> Result<()> {
        match event {
            ControllerEvent::SwitchJoined { dpid, ports } => self.switch_joined(*dpid, ports),
            ControllerEvent::SwitchLeft { dpid } => {
                self.ports.remove(dpid);
                self.pending_no_flood.remove(dpid);
                self.installed.remove(dpid);
            }
            ControllerEvent::PortStatus { dpid, status } => self.port_status(*dpid, status),
            ControllerEvent::PacketIn { dpid, packet } => return self.packet_in(*dpid, packet),
            ControllerEvent::FlowStarted { .. } | ControllerEvent::FlowEnded { .. } => {}
        }
        Ok(())
    }

    fn report(&self) -> Option<String> {
        Some(format!(
            "{} MACs on {} switches, {} packet-ins, {} instructions",
            self.macs.len(),
            self.macs.switch_count(),
            self.stats.packets,
            self.stats.rules
        ))
    }
}
