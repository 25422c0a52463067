//! One OpenFlow session per connected switch.
//!
//! The session owns the socket. It performs the HELLO / FEATURES handshake,
//! registers a [`ChannelSwitch`] handle once the datapath id is known, turns
//! switch messages into controller events and drains the handle's queue onto
//! the wire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::controller::ControllerEvent;
use crate::error::{Error, ProtocolError, Result, SwitchError};
use crate::protocol::{ErrorMsg, OfMessage, OpenFlowCodec};
use crate::switch::{ChannelSwitch, SwitchRegistry};
use crate::types::DatapathId;

/// Session-originated xids live in the top half of the space.
const SESSION_XID_BASE: u32 = 0x8000_0000;

/// OFPET_HELLO_FAILED
const HELLO_FAILED: u16 = 0;

/// Shared by all sessions.
pub struct SessionContext {
    pub registry: Arc<SwitchRegistry>,
    pub events: mpsc::Sender<ControllerEvent>,
    pub echo_interval: Duration,
}

pub(crate) struct Session {
    peer: SocketAddr,
    framed: Framed<TcpStream, OpenFlowCodec>,
    outbound: mpsc::UnboundedReceiver<(u32, OfMessage)>,
    outbound_tx: mpsc::UnboundedSender<(u32, OfMessage)>,
    ctx: Arc<SessionContext>,
    joined: Option<(DatapathId, u64)>,
    next_xid: u32,
}

impl Session {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) -> Self {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        Self {
            peer,
            framed: Framed::new(stream, OpenFlowCodec::new()),
            outbound,
            outbound_tx,
            ctx,
            joined: None,
            next_xid: SESSION_XID_BASE,
        }
    }

    pub(crate) fn dpid(&self) -> Option<DatapathId> {
        self.joined.map(|(dpid, _)| dpid)
    }

    async fn send(&mut self, message: OfMessage) -> Result<()> {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1) | SESSION_XID_BASE;
        self.framed.send((xid, message)).await
    }

    async fn emit(&self, event: ControllerEvent) -> Result<()> {
        self.ctx
            .events
            .send(event)
            .await
            .map_err(|_| Error::Internal("event stream closed".into()))
    }

    /// Run until the switch disconnects, the stream errors or shutdown.
    pub(crate) async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.send(OfMessage::Hello).await?;
        self.send(OfMessage::FeaturesRequest).await?;

        let mut echo = tokio::time::interval_at(
            tokio::time::Instant::now() + self.ctx.echo_interval,
            self.ctx.echo_interval.max(Duration::from_millis(100)),
        );
        echo.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                Some((xid, message)) = self.outbound.recv() => {
                    trace!(peer = %self.peer, xid, kind = message.name(), "sending");
                    if let Err(e) = self.framed.send((xid, message)).await {
                        break Err(e);
                    }
                }
                _ = echo.tick() => {
                    if self.joined.is_some() {
                        if let Err(e) = self.send(OfMessage::EchoRequest(Vec::new())).await {
                            break Err(e);
                        }
                    }
                }
                frame = self.framed.next() => match frame {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(e),
                    Some(Ok((xid, message))) => {
                        if let Err(e) = self.on_message(xid, message).await {
                            break Err(e);
                        }
                    }
                },
            }
        };

        if let Some((dpid, generation)) = self.joined {
            if self.ctx.registry.unregister(dpid, generation) {
                info!(%dpid, peer = %self.peer, "switch disconnected");
                let _ = self.emit(ControllerEvent::SwitchLeft { dpid }).await;
            }
        }
        result
    }

    async fn on_message(&mut self, xid: u32, message: OfMessage) -> Result<()> {
        let kind = message.name();
        match message {
            OfMessage::FeaturesReply(features) => {
                if self.joined.is_some() {
                    debug!(peer = %self.peer, "repeated features reply ignored");
                    return Ok(());
                }
                let dpid = features.datapath_id;
                let handle = Arc::new(ChannelSwitch::new(dpid, self.outbound_tx.clone()));
                let generation = self.ctx.registry.register(handle);
                self.joined = Some((dpid, generation));
                info!(%dpid, peer = %self.peer, ports = features.ports.len(), "switch connected");
                self.emit(ControllerEvent::SwitchJoined {
                    dpid,
                    ports: features.ports,
                })
                .await?;
            }
            OfMessage::EchoRequest(data) => {
                self.framed.send((xid, OfMessage::EchoReply(data))).await?;
            }
            OfMessage::PacketIn(packet) => match self.dpid() {
                Some(dpid) => self.emit(ControllerEvent::PacketIn { dpid, packet }).await?,
                None => debug!(peer = %self.peer, "packet-in before handshake ignored"),
            },
            OfMessage::PortStatus(status) => match self.dpid() {
                Some(dpid) => self.emit(ControllerEvent::PortStatus { dpid, status }).await?,
                None => debug!(peer = %self.peer, "port status before handshake ignored"),
            },
            OfMessage::Error(err) => self.on_error(xid, &err)?,
            OfMessage::Malformed { kind, reason } => {
                warn!(peer = %self.peer, dpid = ?self.dpid(), xid, kind, %reason, "malformed message dropped");
            }
            OfMessage::Hello | OfMessage::EchoReply(_) | OfMessage::BarrierReply => {
                trace!(peer = %self.peer, kind, "received");
            }
            _ => debug!(peer = %self.peer, kind, "ignoring message"),
        }
        Ok(())
    }

    fn on_error(&self, xid: u32, err: &ErrorMsg) -> Result<()> {
        match self.dpid() {
            Some(dpid) => {
                let rejected = SwitchError::Rejected {
                    dpid,
                    xid: err.offending_xid().unwrap_or(xid),
                    kind: err.kind,
                    code: err.code,
                };
                warn!(error = %rejected, "instruction rejected");
                Ok(())
            }
            None if err.kind == HELLO_FAILED => Err(ProtocolError::HandshakeFailed(format!(
                "switch refused hello (code {})",
                err.code
            ))
            .into()),
            None => {
                warn!(peer = %self.peer, kind = err.kind, code = err.code, "error before handshake");
                Ok(())
            }
        }
    }
}
