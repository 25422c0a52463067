//! Handles for issuing instructions to connected switches.
//!
//! Handlers never talk to sockets. They push messages into a [`SwitchHandle`],
//! which for a live switch is an unbounded queue drained by the session task.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, SwitchError};
use crate::protocol::{FlowMod, OfMessage};
use crate::types::DatapathId;

/// First xid handed out for controller instructions.
const FIRST_XID: u32 = 0x100;

/// Outbound instruction sink for one switch.
pub trait SwitchHandle: Send + Sync {
    /// Datapath id of the switch.
    fn dpid(&self) -> DatapathId;

    /// Queue a message without waiting. Returns the transaction id used.
    fn send(&self, message: OfMessage) -> Result<u32>;

    /// Number of messages queued so far.
    fn sent(&self) -> u64;
}

/// Handle backed by the session task's outbound queue.
pub struct ChannelSwitch {
    dpid: DatapathId,
    tx: mpsc::UnboundedSender<(u32, OfMessage)>,
    next_xid: AtomicU32,
    sent: AtomicU64,
}

impl ChannelSwitch {
    pub fn new(dpid: DatapathId, tx: mpsc::UnboundedSender<(u32, OfMessage)>) -> Self {
        Self {
            dpid,
            tx,
            next_xid: AtomicU32::new(FIRST_XID),
            sent: AtomicU64::new(0),
        }
    }
}

impl SwitchHandle for ChannelSwitch {
    fn dpid(&self) -> DatapathId {
        self.dpid
    }

    fn send(&self, message: OfMessage) -> Result<u32> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send((xid, message))
            .map_err(|_| SwitchError::QueueClosed(self.dpid))?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(xid)
    }

    fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

/// Handle that records every message instead of sending it.
///
/// Used by tests and by `check --rules` to print what a switch would receive.
pub struct RecordingSwitch {
    dpid: DatapathId,
    next_xid: AtomicU32,
    messages: Mutex<Vec<(u32, OfMessage)>>,
}

impl RecordingSwitch {
    pub fn new(dpid: DatapathId) -> Self {
        Self {
            dpid,
            next_xid: AtomicU32::new(FIRST_XID),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// All recorded messages in send order.
    pub fn messages(&self) -> Vec<OfMessage> {
        self.messages.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Recorded flow mods in send order.
    pub fn flow_mods(&self) -> Vec<FlowMod> {
        self.messages
            .lock()
            .iter()
            .filter_map(|(_, m)| match m {
                OfMessage::FlowMod(flow_mod) => Some(flow_mod.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drain the recorded messages.
    pub fn take(&self) -> Vec<OfMessage> {
        self.messages.lock().drain(..).map(|(_, m)| m).collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl SwitchHandle for RecordingSwitch {
    fn dpid(&self) -> DatapathId {
        self.dpid
    }

    fn send(&self, message: OfMessage) -> Result<u32> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.messages.lock().push((xid, message));
        Ok(xid)
    }

    fn sent(&self) -> u64 {
        self.messages.lock().len() as u64
    }
}

struct Registered {
    generation: u64,
    handle: Arc<dyn SwitchHandle>,
}

/// Connected switches by datapath id.
///
/// A reconnecting switch replaces its old handle; each registration gets a
/// generation so a stale session cannot unregister its successor.
#[derive(Default)]
pub struct SwitchRegistry {
    switches: DashMap<DatapathId, Registered>,
    generations: AtomicU64,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle, returning its generation.
    pub fn register(&self, handle: Arc<dyn SwitchHandle>) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let dpid = handle.dpid();
        if self
            .switches
            .insert(dpid, Registered { generation, handle })
            .is_some()
        {
            debug!(%dpid, "replaced existing switch handle");
        }
        generation
    }

    /// Remove the handle registered under `generation`. Returns whether it was removed.
    pub fn unregister(&self, dpid: DatapathId, generation: u64) -> bool {
        self.switches
            .remove_if(&dpid, |_, entry| entry.generation == generation)
            .is_some()
    }

    pub fn get(&self, dpid: DatapathId) -> Option<Arc<dyn SwitchHandle>> {
        self.switches.get(&dpid).map(|entry| Arc::clone(&entry.handle))
    }

    pub fn is_connected(&self, dpid: DatapathId) -> bool {
        self.switches.contains_key(&dpid)
    }

    /// Send to a switch by id.
    pub fn send(&self, dpid: DatapathId, message: OfMessage) -> Result<u32> {
        let handle = self.get(dpid).ok_or(SwitchError::NotConnected(dpid))?;
        handle.send(message)
    }

    /// Connected datapath ids in ascending order.
    pub fn connected(&self) -> Vec<DatapathId> {
        let mut ids: Vec<_> = self.switches.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}
