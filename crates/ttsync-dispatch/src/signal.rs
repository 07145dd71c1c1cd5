//! Shutdown signaling for the dispatch loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::info;

/// Broadcast-backed shutdown signal.
///
/// Cloneable handle; any clone can request shutdown, every subscriber
/// observes it. The dispatcher checks it between ticks, so an in-flight
/// refresh always completes before the loop exits.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new signal.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4);
        Self {
            sender,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Request shutdown.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // No receivers is fine; the flag still records the request.
        let _ = self.sender.send(());
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Install OS signal handlers (Unix).
    #[cfg(unix)]
    pub fn install_os_handlers(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let handle = self.clone();
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM");
                handle.request();
            }
        });

        let mut sigint = signal(SignalKind::interrupt())?;
        let handle = self.clone();
        tokio::spawn(async move {
            if sigint.recv().await.is_some() {
                info!("Received SIGINT");
                handle.request();
            }
        });

        info!("OS signal handlers installed (SIGTERM, SIGINT)");
        Ok(())
    }

    /// Install OS signal handlers (non-Unix fallback, Ctrl+C only).
    #[cfg(not(unix))]
    pub fn install_os_handlers(&self) -> std::io::Result<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handle.request();
            }
        });

        info!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_reaches_subscribers_and_sets_flag() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        assert!(!signal.is_requested());

        signal.clone().request();

        assert!(signal.is_requested());
        rx.recv().await.unwrap();
    }
}
