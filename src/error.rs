//! Error types for the diamond controller.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::types::DatapathId;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the controller.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    // Switch errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("switch error: {0}")]
    Switch(#[from] SwitchError),

    // Side-channel errors
    #[error("side channel error: {0}")]
    SideChannel(#[from] SideChannelError),

    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Inconsistencies in the static topology description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("duplicate switch {0}")]
    DuplicateSwitch(DatapathId),

    #[error("expected {expected} {role} switches, found {found}")]
    RoleCount {
        role: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("link references unknown switch {0}")]
    UnknownSwitch(DatapathId),

    #[error("port {port} on switch {dpid} is linked more than once")]
    PortReused { dpid: DatapathId, port: u16 },

    #[error("port {port} on switch {dpid} is reserved")]
    ReservedPort { dpid: DatapathId, port: u16 },

    #[error("relay switch {0} has no rail")]
    RelayWithoutRail(DatapathId),

    #[error("both relay switches claim the {0} rail")]
    DuplicateRail(String),

    #[error("invalid link between {a} and {b}: {reason}")]
    InvalidLink {
        a: DatapathId,
        b: DatapathId,
        reason: String,
    },

    #[error("edge switch {edge} has no link to the {rail} rail")]
    MissingRailLink { edge: DatapathId, rail: String },

    #[error("relay switch {0} must link to both edge switches")]
    IncompleteRelay(DatapathId),

    #[error("host {0} attached to more than one edge switch")]
    DuplicateHost(IpAddr),

    #[error("edge switch {0} has no hosts")]
    NoHosts(DatapathId),

    #[error("{0} switch {1} must not list hosts")]
    UnexpectedHosts(&'static str, DatapathId),
}

/// OpenFlow and frame decoding errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unsupported OpenFlow version: expected {expected:#04x}, got {got:#04x}")]
    InvalidVersion { expected: u8, got: u8 },

    #[error("malformed header")]
    MalformedHeader,

    #[error("malformed {kind} message: {reason}")]
    MalformedMessage { kind: &'static str, reason: String },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Failures delivering instructions to a switch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    #[error("switch {0} is not connected")]
    NotConnected(DatapathId),

    #[error("instruction queue for switch {0} is closed")]
    QueueClosed(DatapathId),

    #[error("switch {dpid} rejected instruction {xid}: type {kind}, code {code}")]
    Rejected {
        dpid: DatapathId,
        xid: u32,
        kind: u16,
        code: u16,
    },

    #[error("port {port} on switch {dpid} has no known hardware address")]
    MissingPort { dpid: DatapathId, port: u16 },
}

/// Reasons a side-channel datagram is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SideChannelError {
    #[error("datagram too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("malformed notification: {0}")]
    Malformed(String),

    #[error("unknown state {0:?}")]
    UnknownState(String),

    #[error("sender {0} is not a known host")]
    UnknownSender(IpAddr),

    #[error("peer {0} is not a known host")]
    UnknownPeer(IpAddr),

    #[error("sender {sender} claims to be {claimed}")]
    SourceMismatch { sender: IpAddr, claimed: IpAddr },

    #[error("sender and peer are both {0}")]
    SelfFlow(IpAddr),
}

impl Error {
    /// Check if the error must abort controller startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidConfig(_) | Error::Topology(_) | Error::BindFailed { .. }
        )
    }

    /// Check if the error is a per-event anomaly that should be logged and dropped.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            Error::SideChannel(_)
                | Error::Switch(_)
                | Error::Protocol(ProtocolError::MalformedFrame(_) | ProtocolError::MalformedMessage { .. })
        )
    }
}

/// Error context for debugging.
#[derive(Debug)]
pub struct ErrorContext {
    pub dpid: Option<DatapathId>,
    pub peer_addr: Option<SocketAddr>,
    pub operation: String,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation={}", self.operation)?;
        if let Some(dpid) = self.dpid {
            write!(f, ", switch={dpid}")?;
        }
        if let Some(addr) = self.peer_addr {
            write!(f, ", peer={addr}")?;
        }
        Ok(())
    }
}
