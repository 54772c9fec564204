//! Per-relay shutdown signal.

use tokio::sync::watch;
use tracing::info;

/// Requests that a relay's consume loop stop.
///
/// Each relay owns its own signal; triggering it never affects another relay.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Ask the running session to stop.
    pub fn trigger(&self, reason: &str) {
        info!(reason, "Shutdown requested");
        self.tx.send_replace(true);
    }

    /// Clear a previous request before starting a new session.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that resolves once the signal is triggered.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Waiting side of a [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Wait until shutdown is requested. Cancel safe.
    ///
    /// Returns immediately if the signal is already set. Never resolves if
    /// the signal was dropped without being triggered.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
