//! Broker subscriptions for relay workers.
//!
//! This module contains:
//! - `Broker` trait: opens one subscription session per relay
//! - `BrokerSession` trait: yields deliveries until the connection closes
//! - Implementations: AMQP (RabbitMQ), Mock

use async_trait::async_trait;

use crate::config::RelayConfig;

pub mod amqp;
pub mod mock;

pub use amqp::{AmqpBroker, AmqpBrokerConfig};
pub use mock::{MockBroker, MockSessionHandle};

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur while subscribing or consuming.
///
/// Every variant is retryable from the supervisor's point of view.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel failed: {0}")]
    Channel(String),

    #[error("Queue setup failed: {0}")]
    Queue(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Something that happened on an open session.
#[derive(Debug)]
pub enum SessionEvent {
    /// A message body arrived.
    Delivery(Vec<u8>),
    /// The connection went away; the session is unusable.
    Closed(BrokerError),
}

/// Source of relay subscriptions.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via lapin
/// - `MockBroker`: scripted in-memory sessions for testing
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connect and subscribe a fresh queue to the relay's routing key.
    ///
    /// Any resources acquired before a failure are released before the error
    /// is returned.
    async fn open(&self, relay: &RelayConfig) -> Result<Box<dyn BrokerSession>>;
}

/// One live subscription: connection, channel, bound queue and consumer.
#[async_trait]
pub trait BrokerSession: Send {
    /// Server-generated name of the bound queue.
    fn queue(&self) -> &str;

    /// Wait for the next delivery or for the connection to close.
    ///
    /// Must be cancel safe: it is polled inside `tokio::select!`.
    async fn next_event(&mut self) -> SessionEvent;

    /// Release the channel and connection.
    async fn close(self: Box<Self>);
}
