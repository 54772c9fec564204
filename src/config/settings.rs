//! Global settings shared by every relay.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use super::{
    ConfigError, ConfigSource, AMQP_URL_KEY, EXCHANGE_KEY, FORWARD_TIMEOUT_KEY,
    RETRY_INTERVAL_KEY,
};

/// Broker address used when `RMQ_ADDR_ROOT` is not configured.
pub const DEFAULT_AMQP_URL: &str = "amqp://localhost:5672";
/// Supervisor delay after a failed session.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
/// Outbound request timeout.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw view of the global keys as they appear in the sources.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    rmq_addr_root: Option<String>,
    rmq_exchange_name: Option<String>,
    shutdown_on_github_push: Option<String>,
    relay_retry_interval_secs: Option<String>,
    relay_retry_jitter: Option<String>,
    relay_forward_timeout_secs: Option<String>,
}

/// Global relay settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub amqp_url: String,
    /// Exchange every relay queue is bound to.
    pub exchange: String,
    /// Stop a relay's consume loop after forwarding a push.
    pub shutdown_on_push: bool,
    /// Delay before restarting a relay whose session failed.
    pub retry_interval: Duration,
    /// Add jitter to `retry_interval`.
    pub retry_jitter: bool,
    /// Timeout for each forwarded request.
    pub forward_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            amqp_url: DEFAULT_AMQP_URL.to_string(),
            exchange: String::new(),
            shutdown_on_push: false,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            retry_jitter: false,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }
}

impl Settings {
    /// Read global settings, falling back to defaults for anything missing.
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let raw: RawSettings = source.deserialize()?;
        let defaults = Self::default();

        let amqp_url = match non_blank(raw.rmq_addr_root) {
            Some(url) => url,
            None => {
                warn!(
                    key = AMQP_URL_KEY,
                    default = DEFAULT_AMQP_URL,
                    "Broker address not configured, using default"
                );
                defaults.amqp_url
            }
        };

        let exchange = match non_blank(raw.rmq_exchange_name) {
            Some(exchange) => exchange,
            None => {
                warn!(
                    key = EXCHANGE_KEY,
                    "Exchange not configured, binding to the default exchange"
                );
                defaults.exchange
            }
        };

        Ok(Self {
            amqp_url,
            exchange,
            shutdown_on_push: is_enabled(raw.shutdown_on_github_push),
            retry_interval: seconds(
                RETRY_INTERVAL_KEY,
                raw.relay_retry_interval_secs,
                defaults.retry_interval,
            ),
            retry_jitter: is_enabled(raw.relay_retry_jitter),
            forward_timeout: seconds(
                FORWARD_TIMEOUT_KEY,
                raw.relay_forward_timeout_secs,
                defaults.forward_timeout,
            ),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_enabled(value: Option<String>) -> bool {
    non_blank(value)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn seconds(key: &str, value: Option<String>, default: Duration) -> Duration {
    let Some(value) = non_blank(value) else {
        return default;
    };
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            warn!(
                key,
                value = %value,
                default_secs = default.as_secs(),
                "Invalid duration, using default"
            );
            default
        }
    }
}
