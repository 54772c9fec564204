//! Mock broker implementation for testing.
//!
//! Every `open` creates a session whose events are pushed by the test through
//! a [`MockSessionHandle`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use super::{Broker, BrokerError, BrokerSession, Result, SessionEvent};
use crate::config::RelayConfig;

/// Mock broker for testing.
#[derive(Default)]
pub struct MockBroker {
    sessions: RwLock<Vec<MockSessionHandle>>,
    fail_on_open: RwLock<HashSet<String>>,
    open_attempts: RwLock<Vec<(String, Instant)>>,
    next_queue: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for one routing key.
    pub async fn set_fail_on_open(&self, routing_key: &str, fail: bool) {
        let mut failing = self.fail_on_open.write().await;
        if fail {
            failing.insert(routing_key.to_string());
        } else {
            failing.remove(routing_key);
        }
    }

    /// Handles for every session opened so far, in open order.
    pub async fn sessions(&self) -> Vec<MockSessionHandle> {
        self.sessions.read().await.clone()
    }

    /// Routing key and time of every `open` call, including failed ones.
    pub async fn open_attempts(&self) -> Vec<(String, Instant)> {
        self.open_attempts.read().await.clone()
    }

    /// Poll until at least `count` sessions were opened or `timeout` elapses.
    pub async fn wait_for_sessions(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<MockSessionHandle> {
        let deadline = Instant::now() + timeout;
        loop {
            let sessions = self.sessions().await;
            if sessions.len() >= count || Instant::now() >= deadline {
                return sessions;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn open(&self, relay: &RelayConfig) -> Result<Box<dyn BrokerSession>> {
        self.open_attempts
            .write()
            .await
            .push((relay.routing_key.clone(), Instant::now()));

        if self.fail_on_open.read().await.contains(&relay.routing_key) {
            return Err(BrokerError::Connection("Mock connect failure".to_string()));
        }

        let queue = format!(
            "amq.gen-mock-{}",
            self.next_queue.fetch_add(1, Ordering::SeqCst)
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        self.sessions.write().await.push(MockSessionHandle {
            routing_key: relay.routing_key.clone(),
            queue: queue.clone(),
            opened_at: Instant::now(),
            events: tx,
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(MockSession {
            queue,
            events: rx,
            closed,
        }))
    }
}

/// Test-side control of one mock session.
#[derive(Clone)]
pub struct MockSessionHandle {
    routing_key: String,
    queue: String,
    opened_at: Instant,
    events: mpsc::UnboundedSender<SessionEvent>,
    closed: Arc<AtomicBool>,
}

impl MockSessionHandle {
    /// Push a message body to the session.
    pub fn deliver(&self, body: impl Into<Vec<u8>>) {
        let _ = self.events.send(SessionEvent::Delivery(body.into()));
    }

    /// Simulate the broker dropping the connection.
    pub fn disconnect(&self, reason: &str) {
        let _ = self
            .events
            .send(SessionEvent::Closed(BrokerError::Closed(reason.to_string())));
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Whether the worker released the session.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockSession {
    queue: String,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerSession for MockSession {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next_event(&mut self) -> SessionEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
