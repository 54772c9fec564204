//! mq-post-relay: GitHub push relay
//!
//! Consumes webhook payloads published by the ingestion pipeline and posts
//! each one to the build server configured for its repository.
//!
//! ## Architecture
//! ```text
//! [webhook center] --> (exchange) --routing key--> [relay N] --POST--> target N
//! ```
//!
//! ## Configuration
//! - RMQ_ADDR_ROOT: Broker URL
//! - RMQ_EXCHANGE_NAME: Exchange to bind relay queues to
//! - RELAY_COUNT + DIRECT_EXCHANGE_REPO_KEY_<n> / RELAY_TARGET_URL_<n>:
//!   numbered relays, or the unnumbered pair for a single relay
//! - SHUTDOWN_ON_GITHUB_PUSH: Restart a relay's session after each push
//! - RELAY_LOG: Log filter (default: info)
//!
//! Values may also come from `relay.yaml`, the file named by RELAY_CONFIG,
//! or a `.env` file in the working directory.

use std::sync::Arc;

use tracing::{error, info};

use mq_post_relay::broker::{AmqpBroker, AmqpBrokerConfig};
use mq_post_relay::config::{ConfigSource, RelayConfigSet, Settings};
use mq_post_relay::forward::Forwarder;
use mq_post_relay::relay::{RelayManager, SupervisorConfig};
use mq_post_relay::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!("github-mq-to-post-relay started");

    let source = ConfigSource::load()?;
    let settings = Settings::from_source(&source)?;
    let relays = RelayConfigSet::from_source(&source).inspect_err(|e| {
        error!(error = %e, "No usable relay configuration");
    })?;
    info!(count = relays.len(), "Loaded relay configuration(s)");

    let broker = Arc::new(AmqpBroker::new(AmqpBrokerConfig::from_settings(&settings)));
    let forwarder = Arc::new(Forwarder::new(settings.forward_timeout)?);
    let manager = RelayManager::new(
        broker,
        forwarder,
        SupervisorConfig::from_settings(&settings),
    );

    tokio::select! {
        _ = manager.run(relays) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
    }

    Ok(())
}
