//! Connection balancer: greedy per-flow rail assignment.
//!
//! Each announced flow goes onto the rail with fewer live flows, with ties
//! going to the default rail. Assignments are never revisited. The balancer's
//! counters are the only source of truth; rules on the switches are a
//! consequence of them and may be lost without affecting the decisions.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RulesConfig;
use crate::controller::{ControllerEvent, EventHandler};
use crate::error::Result;
use crate::protocol::{Action, FlowMod, OfMatch, OfMessage};
use crate::router::priority;
use crate::switch::SwitchRegistry;
use crate::topology::Topology;
use crate::types::{DatapathId, FlowKey, FlowToken, Rail, TcpEndpoints};

/// Rail counters and live record count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BalancerSnapshot {
    pub top: usize,
    pub bottom: usize,
    pub active: usize,
}

impl BalancerSnapshot {
    pub fn count(&self, rail: Rail) -> usize {
        match rail {
            Rail::Top => self.top,
            Rail::Bottom => self.bottom,
        }
    }
}

impl fmt::Display for BalancerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "top={} bottom={} active={}", self.top, self.bottom, self.active)
    }
}

/// A live flow.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub rail: Rail,
    pub started: Instant,
    pub endpoints: Option<TcpEndpoints>,
}

impl FlowRecord {
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Pinning rule for one direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PinRule {
    dpid: DatapathId,
    pattern: OfMatch,
    out_port: u16,
}

/// Balancer event handler.
pub struct ConnectionBalancer {
    topology: Arc<Topology>,
    switches: Arc<SwitchRegistry>,
    rules: RulesConfig,
    counters: [usize; 2],
    flows: HashMap<FlowKey, FlowRecord>,
    published: Arc<RwLock<BalancerSnapshot>>,
}

impl ConnectionBalancer {
    pub fn new(topology: Arc<Topology>, switches: Arc<SwitchRegistry>, rules: RulesConfig) -> Self {
        Self {
            topology,
            switches,
            rules,
            counters: [0; 2],
            flows: HashMap::new(),
            published: Arc::new(RwLock::new(BalancerSnapshot::default())),
        }
    }

    /// Current counters.
    pub fn snapshot(&self) -> BalancerSnapshot {
        BalancerSnapshot {
            top: self.counters[Rail::Top.index()],
            bottom: self.counters[Rail::Bottom.index()],
            active: self.flows.len(),
        }
    }

    /// Shared view of the counters, refreshed after every change.
    pub fn snapshot_handle(&self) -> Arc<RwLock<BalancerSnapshot>> {
        Arc::clone(&self.published)
    }

    /// Record of a live flow.
    pub fn flow(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.flows.get(key)
    }

    /// Live flows.
    pub fn flows(&self) -> impl Iterator<Item = (&FlowKey, &FlowRecord)> {
        self.flows.iter()
    }

    /// Announce a flow between two hosts. Returns the rail it rides, or `None`
    /// when the pair does not cross the diamond.
    pub fn on_flow_start(&mut self, a: Ipv4Addr, b: Ipv4Addr, token: impl Into<FlowToken>) -> Option<Rail> {
        self.start_flow(FlowKey::new(a, b, token), None)
    }

    /// End a flow. Returns the rail it was on, or `None` if it was not live.
    pub fn on_flow_stop(&mut self, a: Ipv4Addr, b: Ipv4Addr, token: impl Into<FlowToken>) -> Option<Rail> {
        self.stop_flow(&FlowKey::new(a, b, token))
    }

    fn pick_rail(&self) -> Rail {
        let top = self.counters[Rail::Top.index()];
        let bottom = self.counters[Rail::Bottom.index()];
        if top < bottom {
            Rail::Top
        } else if bottom < top {
            Rail::Bottom
        } else {
            self.topology.default_rail()
        }
    }

    /// Start a flow, optionally with TCP endpoints for a finer match.
    pub fn start_flow(&mut self, key: FlowKey, endpoints: Option<TcpEndpoints>) -> Option<Rail> {
        if let Some(existing) = self.flows.get(&key) {
            debug!(flow = %key, rail = %existing.rail, "duplicate flow start ignored");
            return Some(existing.rail);
        }

        let (a, b) = (key.hosts.first(), key.hosts.second());
        let (Some(edge_a), Some(edge_b)) = (self.topology.edge_for_host(a), self.topology.edge_for_host(b)) else {
            warn!(flow = %key, "flow between unknown hosts ignored");
            return None;
        };
        if edge_a == edge_b {
            info!(flow = %key, edge = %edge_a, "hosts share an edge switch, no rail to balance");
            return None;
        }

        let rail = self.pick_rail();
        self.counters[rail.index()] += 1;
        let record = FlowRecord {
            rail,
            started: Instant::now(),
            endpoints,
        };
        let rules = self.pin_rules(&key, &record);
        for other in self.shadowed(&rules, rail) {
            warn!(
                flow = %key,
                %rail,
                shadowed = %other,
                "pin has the same match as a live flow on the other rail; add TCP ports to separate them"
            );
        }
        for rule in rules {
            self.install(rule);
        }
        self.flows.insert(key.clone(), record);
        self.publish();

        info!(flow = %key, %rail, counters = %self.snapshot(), "flow assigned");
        Some(rail)
    }

    /// Stop a flow. Unknown flows are a no-op.
    pub fn stop_flow(&mut self, key: &FlowKey) -> Option<Rail> {
        let Some(record) = self.flows.remove(key) else {
            debug!(flow = %key, "stop for unknown flow ignored");
            return None;
        };
        let slot = &mut self.counters[record.rail.index()];
        *slot = slot.saturating_sub(1);

        if self.rules.remove_on_stop {
            for rule in self.pin_rules(key, &record) {
                self.unpin(rule);
            }
        }
        self.publish();

        info!(
            flow = %key,
            rail = %record.rail,
            duration = ?record.age(),
            counters = %self.snapshot(),
            "flow ended"
        );
        Some(record.rail)
    }

    /// Live flows on another rail whose pins share a switch and match with `rules`.
    /// Installing `rules` overwrites theirs in the data plane.
    fn shadowed(&self, rules: &[PinRule], rail: Rail) -> Vec<FlowKey> {
        self.flows
            .iter()
            .filter(|(_, record)| record.rail != rail)
            .filter(|(key, record)| {
                self.pin_rules(key, record)
                    .iter()
                    .any(|other| rules.iter().any(|r| r.dpid == other.dpid && r.pattern == other.pattern))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Re-pin every live flow that traverses `dpid`, after it (re)joined.
    pub fn repin(&mut self, dpid: DatapathId) {
        let rules: Vec<PinRule> = self
            .flows
            .iter()
            .flat_map(|(key, record)| self.pin_rules(key, record))
            .filter(|rule| rule.dpid == dpid)
            .collect();
        if !rules.is_empty() {
            info!(%dpid, rules = rules.len(), "re-pinning live flows");
        }
        for rule in rules {
            self.install(rule);
        }
    }

    /// One rule per participant: on its edge, traffic towards the peer leaves on the rail port.
    fn pin_rules(&self, key: &FlowKey, record: &FlowRecord) -> Vec<PinRule> {
        let (a, b) = (key.hosts.first(), key.hosts.second());
        [(a, b), (b, a)]
            .into_iter()
            .filter_map(|(local, remote)| {
                let dpid = self.topology.edge_for_host(local)?;
                let out_port = self.topology.rail_port(dpid, record.rail)?;
                let mut pattern = OfMatch::any().ipv4(local, remote);
                if let Some(ends) = record.endpoints {
                    pattern = pattern.tcp_ports(ends.src_port_from(local), ends.dst_port_from(local));
                }
                Some(PinRule {
                    dpid,
                    pattern,
                    out_port,
                })
            })
            .collect()
    }

    fn install(&self, rule: PinRule) {
        let flow_mod = FlowMod::add(rule.pattern, priority::ROUTE_CONNECTION, vec![Action::output(rule.out_port)])
            .with_timeouts(self.rules.flow_idle_secs(), self.rules.flow_hard_secs());
        if let Err(e) = self.switches.send(rule.dpid, OfMessage::FlowMod(flow_mod)) {
            debug!(dpid = %rule.dpid, error = %e, "pin deferred until the switch joins");
        }
    }

    /// Remove a rule unless another live flow produces the same match, in
    /// which case that flow's rule is written back.
    fn unpin(&self, rule: PinRule) {
        let survivor = self
            .flows
            .iter()
            .flat_map(|(key, record)| self.pin_rules(key, record))
            .find(|other| other.dpid == rule.dpid && other.pattern == rule.pattern);

        match survivor {
            Some(other) => self.install(other),
            None => {
                let flow_mod = FlowMod::delete_strict(rule.pattern, priority::ROUTE_CONNECTION);
                if let Err(e) = self.switches.send(rule.dpid, OfMessage::FlowMod(flow_mod)) {
                    debug!(dpid = %rule.dpid, error = %e, "rule removal skipped");
                }
            }
        }
    }

    fn publish(&self) {
        *self.published.write() = self.snapshot();
    }
}

impl EventHandler for ConnectionBalancer {
    fn name(&self) -> &'static str {
        "balancer"
    }

    fn handle(&mut self, event: &ControllerEvent) -> Result<()> {
        match event {
            ControllerEvent::FlowStarted { key, endpoints } => {
                self.start_flow(key.clone(), *endpoints);
            }
            ControllerEvent::FlowEnded { key } => {
                self.stop_flow(key);
            }
            ControllerEvent::SwitchJoined { dpid, .. } => {
                if self.topology.switch(*dpid).is_some_and(|s| s.is_edge()) {
                    self.repin(*dpid);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn report(&self) -> Option<String> {
        Some(self.snapshot().to_string())
    }
}
