//! AMQP (RabbitMQ) broker implementation.
//!
//! Each session owns its own connection and channel. The queue is
//! server-named, exclusive and auto-deleted, so nothing outlives the session.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, ConfirmSelectOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError, BrokerSession, Result, SessionEvent};
use crate::config::{RelayConfig, Settings};

/// Prefix of the client connection name shown in the broker's management UI.
const CONNECTION_NAME_PREFIX: &str = "github-mq-to-post-relay";

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Configuration for AMQP connections.
#[derive(Clone, Debug)]
pub struct AmqpBrokerConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Exchange the relay queues are bound to.
    pub exchange: String,
}

impl AmqpBrokerConfig {
    pub fn new(url: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.amqp_url, &settings.exchange)
    }
}

/// RabbitMQ broker.
///
/// `open` runs the whole setup sequence: connect, open a channel in confirm
/// mode, declare a transient queue, bind it, and start a no-ack consumer.
pub struct AmqpBroker {
    config: AmqpBrokerConfig,
}

impl AmqpBroker {
    pub fn new(config: AmqpBrokerConfig) -> Self {
        Self { config }
    }

    /// Client connection name for a relay.
    fn connection_name(routing_key: &str) -> String {
        format!("{}:{}", CONNECTION_NAME_PREFIX, routing_key)
    }

    async fn open_channel(connection: &Connection) -> Result<Channel> {
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(format!("Failed to create channel: {}", e)))?;

        // Not used for publishing; kept so the channel mode matches other
        // clients on the same broker.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(format!("Failed to enable confirms: {}", e)))?;

        Ok(channel)
    }

    /// Declare the transient queue, bind it and start consuming.
    async fn subscribe(&self, channel: &Channel, routing_key: &str) -> Result<(String, Consumer)> {
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Queue(format!("Failed to declare queue: {}", e)))?;
        let queue = queue.name().as_str().to_string();

        channel
            .queue_bind(
                &queue,
                &self.config.exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Queue(format!("Failed to bind queue: {}", e)))?;

        debug!(
            queue = %queue,
            exchange = %self.config.exchange,
            routing_key = %routing_key,
            "Bound queue to exchange"
        );

        // Deliveries count as handled once dequeued.
        let consumer = channel
            .basic_consume(
                &queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("Failed to start consumer: {}", e)))?;

        Ok((queue, consumer))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn open(&self, relay: &RelayConfig) -> Result<Box<dyn BrokerSession>> {
        let properties = ConnectionProperties::default()
            .with_connection_name(Self::connection_name(&relay.routing_key).into());

        let connection = Connection::connect(&self.config.url, properties)
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = match Self::open_channel(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                close_connection(&connection).await;
                return Err(e);
            }
        };

        let (queue, consumer) = match self.subscribe(&channel, &relay.routing_key).await {
            Ok(subscription) => subscription,
            Err(e) => {
                release(&channel, &connection).await;
                return Err(e);
            }
        };

        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        connection.on_error(move |err| {
            let _ = closed_tx.send(err);
        });

        info!(queue = %queue, "Listening for GitHub pushes");

        Ok(Box::new(AmqpSession {
            connection,
            channel,
            queue,
            consumer,
            closed: closed_rx,
        }))
    }
}

/// Open AMQP subscription.
struct AmqpSession {
    connection: Connection,
    channel: Channel,
    queue: String,
    consumer: Consumer,
    closed: mpsc::UnboundedReceiver<lapin::Error>,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            Some(err) = self.closed.recv() => {
                SessionEvent::Closed(BrokerError::Closed(err.to_string()))
            }
            delivery = self.consumer.next() => match delivery {
                Some(Ok(delivery)) => SessionEvent::Delivery(delivery.data),
                Some(Err(e)) => SessionEvent::Closed(BrokerError::Closed(format!(
                    "Consumer delivery error: {}",
                    e
                ))),
                None => SessionEvent::Closed(BrokerError::Closed(
                    "Consumer stream ended".to_string(),
                )),
            },
        }
    }

    async fn close(self: Box<Self>) {
        release(&self.channel, &self.connection).await;
    }
}

async fn release(channel: &Channel, connection: &Connection) {
    if let Err(e) = channel.close(REPLY_SUCCESS, "relay stopped").await {
        warn!(error = %e, "Closing channel failed");
    }
    close_connection(connection).await;
}

async fn close_connection(connection: &Connection) {
    if let Err(e) = connection.close(REPLY_SUCCESS, "relay stopped").await {
        warn!(error = %e, "Closing connection failed");
    }
}
