//! Per-switch MAC address learning.

use std::collections::HashMap;
use std::time::Instant;

use crate::types::{DatapathId, MacAddr};

/// Where a MAC was last seen on one switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacEntry {
    pub port: u16,
    pub last_seen: Instant,
}

/// Outcome of recording an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Learned {
    /// First sighting on this switch.
    New,
    /// Seen before on a different port.
    Moved { from: u16 },
    /// Seen before on the same port.
    Refreshed,
}

impl Learned {
    /// Whether forwarding state derived from the entry must be reinstalled.
    pub fn changed(self) -> bool {
        !matches!(self, Learned::Refreshed)
    }
}

/// `(switch, MAC) -> ingress port`, latest observation wins.
///
/// Entries are never removed.
#[derive(Debug, Default)]
pub struct MacTable {
    switches: HashMap<DatapathId, HashMap<MacAddr, MacEntry>>,
}

impl MacTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mac` arrived on `port` of `dpid`.
    pub fn learn(&mut self, dpid: DatapathId, mac: MacAddr, port: u16) -> Learned {
        let now = Instant::now();
        let table = self.switches.entry(dpid).or_default();
        match table.insert(mac, MacEntry { port, last_seen: now }) {
            None => Learned::New,
            Some(previous) if previous.port != port => Learned::Moved { from: previous.port },
            Some(_) => Learned::Refreshed,
        }
    }

    /// Port `mac` was last seen on at `dpid`.
    pub fn lookup(&self, dpid: DatapathId, mac: MacAddr) -> Option<u16> {
        self.entry(dpid, mac).map(|e| e.port)
    }

    pub fn entry(&self, dpid: DatapathId, mac: MacAddr) -> Option<&MacEntry> {
        self.switches.get(&dpid)?.get(&mac)
    }

    /// Entries learned on one switch.
    pub fn entries(&self, dpid: DatapathId) -> impl Iterator<Item = (&MacAddr, &MacEntry)> {
        self.switches.get(&dpid).into_iter().flat_map(|t| t.iter())
    }

    /// Total entries over all switches.
    pub fn len(&self) -> usize {
        self.switches.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of switches with at least one entry.
    pub fn switch_count(&self) -> usize {
        self.switches.values().filter(|t| !t.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: DatapathId = DatapathId(1);
    const S4: DatapathId = DatapathId(4);

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_latest_observation_wins() {
        let mut table = MacTable::new();
        assert_eq!(table.learn(S1, mac(1), 3), Learned::New);
        assert_eq!(table.learn(S1, mac(1), 3), Learned::Refreshed);
        assert_eq!(table.learn(S1, mac(1), 1), Learned::Moved { from: 3 });
        assert_eq!(table.lookup(S1, mac(1)), Some(1));
    }

    #[test]
    fn test_switches_are_independent() {
        let mut table = MacTable::new();
        table.learn(S1, mac(1), 3);
        table.learn(S4, mac(1), 2);

        assert_eq!(table.lookup(S1, mac(1)), Some(3));
        assert_eq!(table.lookup(S4, mac(1)), Some(2));
        assert_eq!(table.lookup(S4, mac(9)), None);
        assert_eq!(table.len(), 2);
        assert_eq!(table.switch_count(), 2);
        assert_eq!(table.entries(S1).count(), 1);
    }
}
