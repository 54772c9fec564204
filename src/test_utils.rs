//! Test utilities and mock implementations.
//!
//! Provides an in-memory [`PayloadSink`] so relay workers can be exercised
//! without an HTTP target. See also [`crate::broker::MockBroker`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::RelayConfig;
use crate::forward::PayloadSink;

/// One recorded forward call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarded {
    pub index: usize,
    pub routing_key: String,
    pub target_url: String,
    pub body: Vec<u8>,
}

/// Sink that records every payload it is handed.
#[derive(Default)]
pub struct RecordingSink {
    forwarded: RwLock<Vec<Forwarded>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn forwarded(&self) -> Vec<Forwarded> {
        self.forwarded.read().await.clone()
    }

    pub async fn bodies(&self) -> Vec<Vec<u8>> {
        self.forwarded
            .read()
            .await
            .iter()
            .map(|f| f.body.clone())
            .collect()
    }

    /// Bodies forwarded for one routing key.
    pub async fn bodies_for(&self, routing_key: &str) -> Vec<Vec<u8>> {
        self.forwarded
            .read()
            .await
            .iter()
            .filter(|f| f.routing_key == routing_key)
            .map(|f| f.body.clone())
            .collect()
    }

    /// Poll until at least `count` payloads were recorded or `timeout` elapses.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Forwarded> {
        let deadline = Instant::now() + timeout;
        loop {
            let forwarded = self.forwarded().await;
            if forwarded.len() >= count || Instant::now() >= deadline {
                return forwarded;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl PayloadSink for RecordingSink {
    async fn forward(&self, payload: &[u8], relay: &RelayConfig) {
        self.forwarded.write().await.push(Forwarded {
            index: relay.index,
            routing_key: relay.routing_key.clone(),
            target_url: relay.target_url.clone(),
            body: payload.to_vec(),
        });
    }
}
