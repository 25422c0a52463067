//! UDP side channel carrying flow start/stop notifications from hosts.
//!
//! Each datagram is one JSON object:
//!
//! ```json
//! {"dest": "10.0.0.5", "state": "open", "token": "t1", "src_port": 40000, "dst_port": 9000}
//! ```
//!
//! The sender's address is one participant and `dest` the other. Anything
//! that does not validate is logged and dropped; nothing is ever answered.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::SideChannelConfig;
use crate::controller::ControllerEvent;
use crate::error::{Error, Result, SideChannelError};
use crate::topology::Topology;
use crate::types::{FlowKey, TcpEndpoints};

/// Announced flow transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Open,
    Close,
}

impl FromStr for FlowState {
    type Err = SideChannelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "start" => Ok(Self::Open),
            "close" | "stop" => Ok(Self::Close),
            _ => Err(SideChannelError::UnknownState(s.to_string())),
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Wire shape; `state` is parsed separately so an unknown value gets its own error.
#[derive(Deserialize)]
struct RawNotification {
    #[serde(default)]
    src: Option<IpAddr>,
    dest: IpAddr,
    state: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    src_port: Option<u16>,
    #[serde(default)]
    dst_port: Option<u16>,
}

/// A decoded notification, not yet checked against the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<IpAddr>,
    pub dest: IpAddr,
    pub state: FlowState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
}

fn to_v4(addr: IpAddr) -> Option<Ipv4Addr> {
    match addr {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

impl FlowNotification {
    pub fn new(dest: IpAddr, state: FlowState, token: impl Into<String>) -> Self {
        Self {
            src: None,
            dest,
            state,
            token: token.into(),
            src_port: None,
            dst_port: None,
        }
    }

    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = Some(src_port);
        self.dst_port = Some(dst_port);
        self
    }

    /// Parse a datagram payload.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, SideChannelError> {
        let raw: RawNotification =
            serde_json::from_slice(data).map_err(|e| SideChannelError::Malformed(e.to_string()))?;
        Ok(Self {
            src: raw.src,
            dest: raw.dest,
            state: raw.state.parse()?,
            token: raw.token.unwrap_or_default(),
            src_port: raw.src_port,
            dst_port: raw.dst_port,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Validate against the topology and turn into a controller event.
    pub fn into_event(
        self,
        sender: IpAddr,
        topology: &Topology,
    ) -> std::result::Result<ControllerEvent, SideChannelError> {
        let source = to_v4(sender)
            .filter(|addr| topology.edge_for_host(*addr).is_some())
            .ok_or(SideChannelError::UnknownSender(sender))?;

        if let Some(claimed) = self.src {
            if to_v4(claimed) != Some(source) {
                return Err(SideChannelError::SourceMismatch { sender, claimed });
            }
        }

        let peer = to_v4(self.dest)
            .filter(|addr| topology.edge_for_host(*addr).is_some())
            .ok_or(SideChannelError::UnknownPeer(self.dest))?;

        if peer == source {
            return Err(SideChannelError::SelfFlow(sender));
        }

        let key = FlowKey::new(source, peer, self.token);
        Ok(match self.state {
            FlowState::Open => ControllerEvent::FlowStarted {
                key,
                endpoints: match (self.src_port, self.dst_port) {
                    (Some(client_port), Some(server_port)) => Some(TcpEndpoints {
                        client: source,
                        client_port,
                        server: peer,
                        server_port,
                    }),
                    _ => None,
                },
            },
            FlowState::Close => ControllerEvent::FlowEnded { key },
        })
    }
}

/// Listener statistics.
#[derive(Debug, Default)]
pub struct SideChannelStats {
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    pub dropped: AtomicU64,
}

/// Receives notifications and republishes them on the event stream.
pub struct SideChannelListener {
    socket: UdpSocket,
    topology: Arc<Topology>,
    events: mpsc::Sender<ControllerEvent>,
    max_datagram: usize,
    stats: Arc<SideChannelStats>,
}

impl SideChannelListener {
    pub async fn bind(
        config: &SideChannelConfig,
        topology: Arc<Topology>,
        events: mpsc::Sender<ControllerEvent>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen_addr)
            .await
            .map_err(|e| Error::BindFailed {
                addr: config.listen_addr,
                reason: e.to_string(),
            })?;
        Ok(Self {
            socket,
            topology,
            events,
            max_datagram: config.max_datagram,
            stats: Arc::new(SideChannelStats::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> Arc<SideChannelStats> {
        Arc::clone(&self.stats)
    }

    /// Decode and validate one datagram.
    pub fn process(&self, data: &[u8], sender: SocketAddr) -> std::result::Result<ControllerEvent, SideChannelError> {
        if data.len() > self.max_datagram {
            return Err(SideChannelError::TooLarge {
                size: data.len(),
                max: self.max_datagram,
            });
        }
        FlowNotification::decode(data)?.into_event(sender.ip(), &self.topology)
    }

    /// Receive until shutdown or until the event stream closes.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        // One extra byte so oversized datagrams are detectable rather than truncated.
        let mut buf = vec![0u8; self.max_datagram + 1];
        info!(addr = ?self.socket.local_addr().ok(), "side channel listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, sender) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            error!(error = %e, "side channel receive failed");
                            continue;
                        }
                    };
                    self.stats.received.fetch_add(1, Ordering::Relaxed);

                    match self.process(&buf[..len], sender) {
                        Ok(event) => {
                            debug!(%sender, event = event.kind(), "notification accepted");
                            self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                            if self.events.send(event).await.is_err() {
                                debug!("event stream closed");
                                break;
                            }
                        }
                        Err(e) => {
                            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(%sender, error = %e, "notification dropped");
                        }
                    }
                }
            }
        }

        debug!("side channel stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyConfig;

    fn topology() -> Topology {
        TopologyConfig::diamond(2).build().unwrap()
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_decode_minimal() {
        let n = FlowNotification::decode(br#"{"dest": "10.0.0.3", "state": "open"}"#).unwrap();
        assert_eq!(n.dest, ip(3));
        assert_eq!(n.state, FlowState::Open);
        assert!(n.token.is_empty());
    }

    #[test]
    fn test_state_aliases() {
        assert_eq!("start".parse::<FlowState>().unwrap(), FlowState::Open);
        assert_eq!("STOP".parse::<FlowState>().unwrap(), FlowState::Close);
        assert_eq!(
            FlowNotification::decode(br#"{"dest": "10.0.0.3", "state": "paused"}"#),
            Err(SideChannelError::UnknownState("paused".into()))
        );
    }

    #[test]
    fn test_malformed_payloads() {
        let payloads: [&[u8]; 3] = [b"not json", br#"{"state": "open"}"#, &[0xff, 0xfe]];
        for payload in payloads {
            assert!(matches!(
                FlowNotification::decode(payload),
                Err(SideChannelError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_open_becomes_flow_started() {
        let event = FlowNotification::new(ip(3), FlowState::Open, "t1")
            .with_ports(40000, 9000)
            .into_event(ip(1), &topology())
            .unwrap();
        match event {
            ControllerEvent::FlowStarted { key, endpoints } => {
                assert_eq!(key, FlowKey::new(Ipv4Addr::new(10, 0, 0, 3), Ipv4Addr::new(10, 0, 0, 1), "t1"));
                let ends = endpoints.unwrap();
                assert_eq!(ends.client, Ipv4Addr::new(10, 0, 0, 1));
                assert_eq!(ends.server_port, 9000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_validation_failures() {
        let topo = topology();
        let open = |dest| FlowNotification::new(dest, FlowState::Open, "");

        assert_eq!(
            open(ip(3)).into_event(ip(50), &topo),
            Err(SideChannelError::UnknownSender(ip(50)))
        );
        assert_eq!(
            open(ip(50)).into_event(ip(1), &topo),
            Err(SideChannelError::UnknownPeer(ip(50)))
        );
        assert_eq!(
            open(ip(1)).into_event(ip(1), &topo),
            Err(SideChannelError::SelfFlow(ip(1)))
        );

        let mut spoofed = open(ip(3));
        spoofed.src = Some(ip(2));
        assert_eq!(
            spoofed.into_event(ip(1), &topo),
            Err(SideChannelError::SourceMismatch {
                sender: ip(1),
                claimed: ip(2)
            })
        );
    }

    #[test]
    fn test_mapped_v6_sender_accepted() {
        let sender = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped());
        let event = FlowNotification::new(ip(4), FlowState::Close, "x")
            .into_event(sender, &topology())
            .unwrap();
        assert!(matches!(event, ControllerEvent::FlowEnded { .. }));
    }

    #[test]
    fn test_encode_is_decodable() {
        let n = FlowNotification::new(ip(4), FlowState::Close, "t9");
        assert_eq!(FlowNotification::decode(&n.encode()).unwrap(), n);
    }
}
