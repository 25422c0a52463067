//! Network-facing side of the controller.
//!
//! This module contains:
//! - The OpenFlow listener and per-switch sessions
//! - Signal handling
//! - [`ControllerService`], which wires listeners, handlers and the event loop

mod sessions;
mod signals;

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use sessions::SessionContext;
pub use signals::{ShutdownSignal, Signal, SignalHandler};

use crate::balancer::{BalancerSnapshot, ConnectionBalancer};
use crate::config::Config;
use crate::controller::Controller;
use crate::error::{Error, ErrorContext, Result};
use crate::router::Router;
use crate::side_channel::SideChannelListener;
use crate::switch::SwitchRegistry;
use crate::topology::Topology;
use sessions::Session;

/// Accepts switch connections.
pub struct OpenFlowServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
}

impl OpenFlowServer {
    pub async fn bind(addr: SocketAddr, ctx: SessionContext) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| Error::BindFailed {
            addr,
            reason: e.to_string(),
        })?;
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until shutdown. Each session gets its own task.
    pub async fn run(self, shutdown: broadcast::Sender<()>) {
        let mut stop = shutdown.subscribe();
        info!(addr = ?self.listener.local_addr().ok(), "OpenFlow listener started");

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    debug!(%peer, "switch connection accepted");

                    let ctx = Arc::clone(&self.ctx);
                    let session_shutdown = shutdown.subscribe();
                    tokio::spawn(async move {
                        let mut session = Session::new(stream, peer, ctx);
                        if let Err(e) = session.run(session_shutdown).await {
                            let context = ErrorContext {
                                dpid: session.dpid(),
                                peer_addr: Some(peer),
                                operation: "session".into(),
                            };
                            warn!(%context, error = %e, "switch session closed");
                        }
                    });
                }
            }
        }

        debug!("OpenFlow listener stopped");
    }
}

/// Fully wired controller, bound and ready to run.
pub struct ControllerService {
    topology: Arc<Topology>,
    registry: Arc<SwitchRegistry>,
    openflow: OpenFlowServer,
    side_channel: SideChannelListener,
    controller: Controller,
    balance: Arc<RwLock<BalancerSnapshot>>,
}

impl ControllerService {
    /// Validate the configuration, bind both listeners and subscribe the router
    /// and balancer to the event stream (router first).
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;
        let topology = Arc::new(config.topology()?);
        let registry = Arc::new(SwitchRegistry::new());

        let router = Router::new(Arc::clone(&topology), Arc::clone(&registry), &config.rules);
        let balancer = ConnectionBalancer::new(Arc::clone(&topology), Arc::clone(&registry), config.rules.clone());
        let balance = balancer.snapshot_handle();

        let (controller, events) = Controller::new(config.controller.event_queue);
        let controller = controller
            .with_stats_interval(config.controller.stats_interval)
            .with_handler(router)
            .with_handler(balancer);

        let openflow = OpenFlowServer::bind(
            config.controller.listen_addr,
            SessionContext {
                registry: Arc::clone(&registry),
                events: events.clone(),
                echo_interval: config.controller.echo_interval,
            },
        )
        .await?;
        let side_channel = SideChannelListener::bind(&config.side_channel, Arc::clone(&topology), events).await?;

        Ok(Self {
            topology,
            registry,
            openflow,
            side_channel,
            controller,
            balance,
        })
    }

    pub fn openflow_addr(&self) -> Result<SocketAddr> {
        self.openflow.local_addr()
    }

    pub fn side_channel_addr(&self) -> Result<SocketAddr> {
        self.side_channel.local_addr()
    }

    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(&self.topology)
    }

    pub fn registry(&self) -> Arc<SwitchRegistry> {
        Arc::clone(&self.registry)
    }

    /// Balancer counters as of the last change.
    pub fn balance(&self) -> Arc<RwLock<BalancerSnapshot>> {
        Arc::clone(&self.balance)
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        info!(
            openflow = ?self.openflow.local_addr().ok(),
            side_channel = ?self.side_channel.local_addr().ok(),
            hosts = self.topology.host_count(),
            default_rail = %self.topology.default_rail(),
            "controller service starting"
        );

        let openflow = tokio::spawn(self.openflow.run(shutdown.clone()));
        let side_channel = tokio::spawn(self.side_channel.run(shutdown.subscribe()));

        self.controller.run(shutdown.subscribe()).await;

        let _ = shutdown.send(());
        let (openflow, side_channel) = tokio::join!(openflow, side_channel);
        openflow.map_err(|e| Error::Internal(format!("OpenFlow listener panicked: {e}")))?;
        side_channel.map_err(|e| Error::Internal(format!("side channel panicked: {e}")))?;

        info!("controller service stopped");
        Ok(())
    }
}
