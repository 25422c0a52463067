//! The serialized event stream and its handlers.
//!
//! Switch sessions and the side channel produce [`ControllerEvent`]s into one
//! bounded queue. A single [`Controller`] task drains it and hands every event
//! to each registered [`EventHandler`] in registration order, so handler state
//! never needs locking.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::protocol::{PacketIn, PhyPort, PortStatus};
use crate::types::{DatapathId, FlowKey, TcpEndpoints};

/// Event on the serialized processing stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A switch completed its handshake.
    SwitchJoined { dpid: DatapathId, ports: Vec<PhyPort> },
    /// A switch session ended.
    SwitchLeft { dpid: DatapathId },
    /// A port was added, removed or changed.
    PortStatus { dpid: DatapathId, status: PortStatus },
    /// A packet was sent to the controller.
    PacketIn { dpid: DatapathId, packet: PacketIn },
    /// A host announced a flow.
    FlowStarted {
        key: FlowKey,
        endpoints: Option<TcpEndpoints>,
    },
    /// A host announced the end of a flow.
    FlowEnded { key: FlowKey },
}

impl ControllerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SwitchJoined { .. } => "switch_joined",
            Self::SwitchLeft { .. } => "switch_left",
            Self::PortStatus { .. } => "port_status",
            Self::PacketIn { .. } => "packet_in",
            Self::FlowStarted { .. } => "flow_started",
            Self::FlowEnded { .. } => "flow_ended",
        }
    }
}

/// A component subscribed to the event stream.
pub trait EventHandler: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handle one event. Errors are logged by the controller and never retried.
    fn handle(&mut self, event: &ControllerEvent) -> Result<()>;

    /// One-line status for the periodic report.
    fn report(&self) -> Option<String> {
        None
    }
}

/// Single consumer of the event stream.
pub struct Controller {
    events: mpsc::Receiver<ControllerEvent>,
    handlers: Vec<Box<dyn EventHandler>>,
    stats_interval: Duration,
    processed: u64,
}

impl Controller {
    /// Create a controller and the sender side of its queue.
    pub fn new(queue: usize) -> (Self, mpsc::Sender<ControllerEvent>) {
        let (tx, events) = mpsc::channel(queue.max(1));
        let controller = Self {
            events,
            handlers: Vec::new(),
            stats_interval: Duration::ZERO,
            processed: 0,
        };
        (controller, tx)
    }

    /// Periodic report interval; zero disables it.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Subscribe a handler. Handlers see each event in registration order.
    pub fn with_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Events handled so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Hand one event to every handler.
    pub fn dispatch(&mut self, event: &ControllerEvent) {
        self.processed += 1;
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event) {
                if e.is_anomaly() {
                    warn!(handler = handler.name(), event = event.kind(), error = %e, "event dropped");
                } else {
                    error!(handler = handler.name(), event = event.kind(), error = %e, "event handler failed");
                }
            }
        }
    }

    fn report(&self) {
        let parts: Vec<String> = self
            .handlers
            .iter()
            .filter_map(|h| h.report().map(|r| format!("{}: {r}", h.name())))
            .collect();
        info!(processed = self.processed, "{}", parts.join("; "));
    }

    /// Process events until shutdown or until every sender is gone.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(handlers = ?self.handler_names(), "controller started");

        let mut ticker = (!self.stats_interval.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(self.stats_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("controller shutting down");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => {
                        debug!(event = event.kind(), "dispatching");
                        self.dispatch(&event);
                    }
                    None => {
                        debug!("event queue closed");
                        break;
                    }
                },
                _ = async {
                    match ticker.as_mut() {
                        Some(t) => { t.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => self.report(),
            }
        }

        self.report();
    }
}
