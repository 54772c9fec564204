//! Relay supervision.
//!
//! One task per relay, each restarting its worker forever. Tasks share
//! nothing but the broker and sink handles.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use super::{RelayWorker, ShutdownSignal};
use crate::broker::Broker;
use crate::config::{RelayConfig, RelayConfigSet, Settings};
use crate::forward::PayloadSink;

/// Restart policy shared by all supervision tasks.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay before restarting a failed session.
    pub retry_interval: Duration,
    /// Add random jitter to `retry_interval`.
    pub retry_jitter: bool,
    /// Stop a session after it forwards a push.
    pub shutdown_on_push: bool,
}

impl SupervisorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry_interval: settings.retry_interval,
            retry_jitter: settings.retry_jitter,
            shutdown_on_push: settings.shutdown_on_push,
        }
    }

    /// Unbounded constant backoff.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let builder = ConstantBuilder::default()
            .with_delay(self.retry_interval)
            .with_max_times(usize::MAX);
        if self.retry_jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        }
    }
}

/// Starts and supervises one worker per relay.
pub struct RelayManager {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn PayloadSink>,
    config: SupervisorConfig,
}

impl RelayManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        sink: Arc<dyn PayloadSink>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            broker,
            sink,
            config,
        }
    }

    /// Spawn one supervision task per relay.
    pub fn spawn(&self, relays: RelayConfigSet) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for relay in relays {
            let span = info_span!("relay", index = relay.index, routing_key = %relay.routing_key);
            tasks.spawn(
                supervise(
                    relay,
                    Arc::clone(&self.broker),
                    Arc::clone(&self.sink),
                    self.config.clone(),
                )
                .instrument(span),
            );
        }
        tasks
    }

    /// Run every relay and wait for them. Does not return in normal operation.
    pub async fn run(&self, relays: RelayConfigSet) {
        let mut tasks = self.spawn(relays);
        info!(count = tasks.len(), "Relays started");

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Relay task ended unexpectedly");
            }
        }
        warn!("All relay tasks ended");
    }
}

/// Restart the relay's worker forever.
///
/// Failed sessions wait out the retry interval; a session stopped by its
/// shutdown signal restarts at once.
async fn supervise(
    relay: RelayConfig,
    broker: Arc<dyn Broker>,
    sink: Arc<dyn PayloadSink>,
    config: SupervisorConfig,
) {
    let shutdown = ShutdownSignal::new();
    let mut backoff = config.backoff();

    loop {
        info!(target_url = %relay.target_url, "{}: starting listener", relay);
        shutdown.reset();

        let worker = RelayWorker::new(
            &relay,
            broker.as_ref(),
            sink.as_ref(),
            &shutdown,
            config.shutdown_on_push,
        );

        match worker.run().await {
            Ok(()) => info!("Listener stopped, restarting"),
            Err(e) => {
                let delay = backoff.next().unwrap_or(config.retry_interval);
                error!(
                    error = %e,
                    retry_in_secs = delay.as_secs_f64(),
                    "Listener failed (check the webhook ingestion pipeline is running), \
                     retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::test_utils::RecordingSink;

    fn config(retry_interval: Duration, shutdown_on_push: bool) -> SupervisorConfig {
        SupervisorConfig {
            retry_interval,
            retry_jitter: false,
            shutdown_on_push,
        }
    }

    fn relays(keys: &[&str]) -> RelayConfigSet {
        RelayConfigSet::new(
            keys.iter()
                .enumerate()
                .map(|(i, key)| {
                    RelayConfig::new(i + 1, *key, format!("http://build-{}/hook", i + 1))
                })
                .collect(),
        )
        .unwrap()
    }

    fn manager(
        broker: &Arc<MockBroker>,
        sink: &Arc<RecordingSink>,
        config: SupervisorConfig,
    ) -> RelayManager {
        RelayManager::new(broker.clone(), sink.clone(), config)
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            retry_interval: Duration::from_secs(5),
            shutdown_on_push: true,
            ..Default::default()
        };
        let config = SupervisorConfig::from_settings(&settings);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert!(config.shutdown_on_push);
        assert!(!config.retry_jitter);
    }

    #[test]
    fn test_backoff_is_constant_and_unbounded() {
        let delays: Vec<_> = config(Duration::from_secs(60), false)
            .backoff()
            .take(100)
            .collect();
        assert_eq!(delays.len(), 100);
        assert!(delays.iter().all(|d| *d == Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_one_session_per_relay() {
        let broker = Arc::new(MockBroker::new());
        let sink = Arc::new(RecordingSink::new());
        let mut tasks = manager(&broker, &sink, config(Duration::from_secs(60), false))
            .spawn(relays(&["org/api", "org/web", "org/ops"]));

        let sessions = broker.wait_for_sessions(3, Duration::from_secs(1)).await;
        let mut keys: Vec<_> = sessions.iter().map(|s| s.routing_key().to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["org/api", "org/ops", "org/web"]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.sessions().await.len(), 3);
        tasks.abort_all();
    }

    #[tokio::test]
    async fn test_disconnect_restarts_after_interval() {
        let interval = Duration::from_millis(200);
        let broker = Arc::new(MockBroker::new());
        let sink = Arc::new(RecordingSink::new());
        let mut tasks =
            manager(&broker, &sink, config(interval, false)).spawn(relays(&["org/api"]));

        let sessions = broker.wait_for_sessions(1, Duration::from_secs(1)).await;
        sessions[0].disconnect("CONNECTION_FORCED");

        tokio::time::sleep(interval / 2).await;
        assert_eq!(broker.sessions().await.len(), 1, "restarted before the interval");

        let sessions = broker.wait_for_sessions(2, Duration::from_secs(2)).await;
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].is_closed());
        assert_eq!(sessions[1].routing_key(), "org/api");
        assert!(sessions[1].opened_at() - sessions[0].opened_at() >= interval);
        assert!(!sessions[1].is_closed());
        tasks.abort_all();
    }

    #[tokio::test]
    async fn test_failing_relay_does_not_block_others() {
        let interval = Duration::from_millis(50);
        let broker = Arc::new(MockBroker::new());
        broker.set_fail_on_open("org/broken", true).await;
        let sink = Arc::new(RecordingSink::new());
        let mut tasks = manager(&broker, &sink, config(interval, false))
            .spawn(relays(&["org/broken", "org/api"]));

        let sessions = broker.wait_for_sessions(1, Duration::from_secs(1)).await;
        assert_eq!(sessions[0].routing_key(), "org/api");
        sessions[0].deliver(b"{}".to_vec());
        sink.wait_for(1, Duration::from_secs(1)).await;
        assert_eq!(sink.bodies_for("org/api").await, vec![b"{}".to_vec()]);

        tokio::time::sleep(interval * 3).await;
        let broken_attempts = broker
            .open_attempts()
            .await
            .into_iter()
            .filter(|(key, _)| key == "org/broken")
            .count();
        assert!(broken_attempts >= 2, "broken relay was not retried");
        assert!(!sessions[0].is_closed());
        tasks.abort_all();
    }

    #[tokio::test]
    async fn test_shutdown_on_push_restarts_immediately() {
        let broker = Arc::new(MockBroker::new());
        let sink = Arc::new(RecordingSink::new());
        let mut tasks = manager(&broker, &sink, config(Duration::from_secs(60), true))
            .spawn(relays(&["org/api", "org/web"]));

        let sessions = broker.wait_for_sessions(2, Duration::from_secs(1)).await;
        let api = sessions
            .iter()
            .find(|s| s.routing_key() == "org/api")
            .unwrap()
            .clone();
        let web = sessions
            .iter()
            .find(|s| s.routing_key() == "org/web")
            .unwrap()
            .clone();

        api.deliver(b"push".to_vec());

        let sessions = broker.wait_for_sessions(3, Duration::from_secs(1)).await;
        assert_eq!(sessions.len(), 3, "no restart within the retry interval");
        assert_eq!(sessions[2].routing_key(), "org/api");
        assert!(api.is_closed());
        assert!(!web.is_closed(), "push on one relay stopped another");
        assert_eq!(sink.bodies_for("org/api").await, vec![b"push".to_vec()]);
        tasks.abort_all();
    }
}
