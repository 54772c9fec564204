//! Relay worker: one broker session and its consume loop.

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::ShutdownSignal;
use crate::broker::{Broker, BrokerError, BrokerSession, SessionEvent};
use crate::config::RelayConfig;
use crate::forward::PayloadSink;

/// Reason passed to the shutdown signal when a push triggers it.
const PUSH_SHUTDOWN_REASON: &str = "push from github";

/// Runs a single session for one relay.
///
/// A worker is cheap and short-lived; the supervisor builds a new one for
/// every session.
pub struct RelayWorker<'a> {
    relay: &'a RelayConfig,
    broker: &'a dyn Broker,
    sink: &'a dyn PayloadSink,
    shutdown: &'a ShutdownSignal,
    shutdown_on_push: bool,
}

impl<'a> RelayWorker<'a> {
    pub fn new(
        relay: &'a RelayConfig,
        broker: &'a dyn Broker,
        sink: &'a dyn PayloadSink,
        shutdown: &'a ShutdownSignal,
        shutdown_on_push: bool,
    ) -> Self {
        Self {
            relay,
            broker,
            sink,
            shutdown,
            shutdown_on_push,
        }
    }

    /// Open a session and consume until shutdown or disconnect.
    ///
    /// Returns `Ok(())` only when the shutdown signal stopped the loop. Setup
    /// failures and connection loss are returned unchanged. The session is
    /// released on every exit path.
    pub async fn run(&self) -> Result<(), BrokerError> {
        let mut session = self.broker.open(self.relay).await?;
        let outcome = self.consume(session.as_mut()).await;
        session.close().await;
        outcome
    }

    async fn consume(&self, session: &mut dyn BrokerSession) -> Result<(), BrokerError> {
        let mut shutdown = self.shutdown.listener();

        loop {
            tokio::select! {
                // Checked first so a push-triggered shutdown takes effect
                // before the next queued delivery.
                biased;

                _ = shutdown.requested() => {
                    self.drain(session).await;
                    info!(queue = %session.queue(), "Listener stopped on shutdown request");
                    return Ok(());
                }
                event = session.next_event() => match event {
                    SessionEvent::Delivery(body) => self.on_delivery(&body).await,
                    SessionEvent::Closed(err) => return Err(err),
                },
            }
        }
    }

    /// Forward deliveries the session already holds without waiting for more.
    ///
    /// The queue is auto-acked and deleted with the session, so anything left
    /// buffered here would never be seen again.
    async fn drain(&self, session: &mut dyn BrokerSession) {
        let mut drained = 0usize;
        while let Some(event) = session.next_event().now_or_never() {
            match event {
                SessionEvent::Delivery(body) => {
                    self.sink.forward(&body, self.relay).await;
                    drained += 1;
                }
                SessionEvent::Closed(err) => {
                    warn!(error = %err, "Connection closed while draining deliveries");
                    break;
                }
            }
        }
        if drained > 0 {
            debug!(drained, "Forwarded buffered deliveries before stopping");
        }
    }

    async fn on_delivery(&self, body: &[u8]) {
        if self.shutdown_on_push {
            if !self.shutdown.is_triggered() {
                self.shutdown.trigger(PUSH_SHUTDOWN_REASON);
            }
        } else {
            debug!("Push from GitHub detected, shutdown on push is not enabled. Ignored.");
        }

        self.sink.forward(body, self.relay).await;
    }
}
