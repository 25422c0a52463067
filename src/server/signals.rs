//! Signal handling for graceful shutdown.
//!
//! Handles:
//! - SIGTERM/SIGINT for graceful shutdown
//! - SIGHUP, which is logged and ignored since the topology is static

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Terminate signal (SIGTERM).
    Terminate,
    /// Interrupt signal (SIGINT).
    Interrupt,
    /// Hangup signal (SIGHUP).
    Hangup,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Turns process signals into a shutdown broadcast.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown: Arc<RwLock<bool>>,
    signal_tx: broadcast::Sender<Signal>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SignalHandler {
    /// Create a handler that announces shutdown on `shutdown_tx`.
    pub fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        let (signal_tx, _) = broadcast::channel(16);

        Self {
            shutdown: Arc::new(RwLock::new(false)),
            signal_tx,
            shutdown_tx,
        }
    }

    /// Subscribe to signals.
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }

    /// Check if shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.read()
    }

    /// Request shutdown.
    pub fn request_shutdown(&self) {
        let mut flag = self.shutdown.write();
        if !*flag {
            *flag = true;
            let _ = self.shutdown_tx.send(());
        }
    }

    fn handle_signal(&self, signal: Signal) {
        info!("Received signal: {}", signal);

        match signal {
            Signal::Terminate | Signal::Interrupt => {
                info!("Initiating graceful shutdown");
                self.request_shutdown();
            }
            Signal::Hangup => {
                warn!("Configuration reload is not supported; restart to apply changes");
            }
        }

        let _ = self.signal_tx.send(signal);
    }

    /// Listen for signals until a termination signal arrives (Unix).
    #[cfg(unix)]
    pub async fn listen(&self) {
        use futures::StreamExt;
        use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook_tokio::Signals;

        let signals = match Signals::new([SIGTERM, SIGINT, SIGHUP]) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to register signal handlers: {}", e);
                return;
            }
        };

        let mut signals = signals.fuse();

        while let Some(signal) = signals.next().await {
            let sig = match signal {
                SIGTERM => Signal::Terminate,
                SIGINT => Signal::Interrupt,
                SIGHUP => Signal::Hangup,
                _ => continue,
            };

            self.handle_signal(sig);

            if sig != Signal::Hangup {
                break;
            }
        }
    }

    /// Listen for Ctrl+C (non-Unix fallback).
    #[cfg(not(unix))]
    pub async fn listen(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => self.handle_signal(Signal::Interrupt),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    }

    /// Spawn [`listen`](Self::listen) in the background.
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let handler = self.clone();
        tokio::spawn(async move { handler.listen().await })
    }

    /// Future that completes once shutdown is requested.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            shutdown: Arc::clone(&self.shutdown),
            rx: self.shutdown_tx.subscribe(),
        }
    }
}

/// Waits for shutdown.
pub struct ShutdownSignal {
    shutdown: Arc<RwLock<bool>>,
    rx: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    pub async fn wait(&mut self) {
        if *self.shutdown.read() {
            return;
        }

        loop {
            match self.rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        assert_eq!(format!("{}", Signal::Terminate), "SIGTERM");
        assert_eq!(format!("{}", Signal::Interrupt), "SIGINT");
        assert_eq!(format!("{}", Signal::Hangup), "SIGHUP");
    }

    #[test]
    fn test_interrupt_broadcasts_shutdown_once() {
        let (tx, mut rx) = broadcast::channel(4);
        let handler = SignalHandler::new(tx);

        handler.handle_signal(Signal::Interrupt);
        handler.handle_signal(Signal::Terminate);

        assert!(handler.is_shutdown());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_hangup_does_not_shut_down() {
        let (tx, mut rx) = broadcast::channel(4);
        let handler = SignalHandler::new(tx);
        let mut signals = handler.subscribe();

        handler.handle_signal(Signal::Hangup);

        assert!(!handler.is_shutdown());
        assert!(rx.try_recv().is_err());
        assert_eq!(signals.try_recv().unwrap(), Signal::Hangup);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (tx, _rx) = broadcast::channel(4);
        let handler = SignalHandler::new(tx);
        let mut shutdown = handler.shutdown_signal();

        let handler_clone = handler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            handler_clone.request_shutdown();
        });

        tokio::time::timeout(std::time::Duration::from_millis(500), shutdown.wait())
            .await
            .expect("shutdown should complete");
    }
}
