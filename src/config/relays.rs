//! Per-repository relay entries.
//!
//! Entries come either from numbered keys
//! (`RELAY_COUNT`, `DIRECT_EXCHANGE_REPO_KEY_<n>`, `RELAY_TARGET_URL_<n>`)
//! or from the legacy unnumbered pair.

use std::fmt;

use tracing::{info, warn};
use url::Url;

use super::{ConfigError, ConfigSource, RELAY_COUNT_KEY, ROUTING_KEY_KEY, TARGET_URL_KEY};

/// Index given to the relay built from the legacy unnumbered pair.
const LEGACY_INDEX: usize = 1;

/// Largest accepted `RELAY_COUNT`. Each relay holds its own broker
/// connection, so larger values are treated as misconfiguration.
pub const MAX_RELAY_COUNT: u32 = 1024;

/// One routing key and the URL its messages are posted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Position in the configuration, used for labeling only.
    pub index: usize,
    /// Broker routing key the relay queue is bound with.
    pub routing_key: String,
    /// Destination of the forwarded POST.
    pub target_url: String,
}

impl RelayConfig {
    /// Create a relay entry without validation.
    pub fn new(
        index: usize,
        routing_key: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            index,
            routing_key: routing_key.into(),
            target_url: target_url.into(),
        }
    }

    /// Build a validated entry from optional raw values.
    fn parse(
        index: usize,
        routing_key: Option<String>,
        target_url: Option<String>,
    ) -> Result<Self, String> {
        let routing_key = routing_key.ok_or("routing key missing")?;
        let target_url = target_url.ok_or("target URL missing")?;

        let url = Url::parse(&target_url).map_err(|e| format!("invalid target URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported target URL scheme '{}'", url.scheme()));
        }

        Ok(Self::new(index, routing_key, target_url))
    }
}

impl fmt::Display for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relay {} - {}", self.index, self.routing_key)
    }
}

/// Ordered, non-empty set of relay entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfigSet {
    relays: Vec<RelayConfig>,
    skipped: Vec<usize>,
    legacy: bool,
}

impl RelayConfigSet {
    /// Wrap explicit entries. Fails if `relays` is empty.
    pub fn new(relays: Vec<RelayConfig>) -> Result<Self, ConfigError> {
        if relays.is_empty() {
            return Err(ConfigError::NoRelays);
        }
        Ok(Self {
            relays,
            skipped: Vec::new(),
            legacy: false,
        })
    }

    /// Load relay entries.
    ///
    /// Numbered entries are used when `RELAY_COUNT` parses; incomplete or
    /// invalid indices are skipped with a warning. With no usable numbered
    /// entry the legacy pair is used, and without that the load fails.
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let Some(raw_count) = source.get(RELAY_COUNT_KEY) else {
            return Self::legacy(source, Vec::new());
        };

        let count = match raw_count.parse::<u32>() {
            Ok(count) if count > MAX_RELAY_COUNT => {
                warn!(
                    count,
                    max = MAX_RELAY_COUNT,
                    "RELAY_COUNT too large, using legacy configuration"
                );
                return Self::legacy(source, Vec::new());
            }
            Ok(count) => count,
            Err(_) => {
                warn!(
                    value = %raw_count,
                    "Invalid RELAY_COUNT value, using legacy configuration"
                );
                return Self::legacy(source, Vec::new());
            }
        };

        info!(count, "Loading relay configurations");

        let mut relays = Vec::new();
        let mut skipped = Vec::new();
        for index in 1..=count as usize {
            let routing_key = source.get(&format!("{}_{}", ROUTING_KEY_KEY, index));
            let target_url = source.get(&format!("{}_{}", TARGET_URL_KEY, index));

            match RelayConfig::parse(index, routing_key.clone(), target_url.clone()) {
                Ok(relay) => {
                    info!(
                        index,
                        routing_key = %relay.routing_key,
                        target_url = %relay.target_url,
                        "Relay configured"
                    );
                    relays.push(relay);
                }
                Err(reason) => {
                    warn!(
                        index,
                        routing_key = ?routing_key,
                        target_url = ?target_url,
                        %reason,
                        "Missing configuration for relay, skipping"
                    );
                    skipped.push(index);
                }
            }
        }

        if relays.is_empty() {
            warn!("No valid relay configurations found, falling back to legacy configuration");
            return Self::legacy(source, skipped);
        }

        Ok(Self {
            relays,
            skipped,
            legacy: false,
        })
    }

    fn legacy(source: &ConfigSource, skipped: Vec<usize>) -> Result<Self, ConfigError> {
        let relay = RelayConfig::parse(
            LEGACY_INDEX,
            source.get(ROUTING_KEY_KEY),
            source.get(TARGET_URL_KEY),
        )
        .map_err(|reason| {
            warn!(%reason, "Legacy relay configuration unusable");
            ConfigError::NoRelays
        })?;

        info!(
            routing_key = %relay.routing_key,
            target_url = %relay.target_url,
            "Using legacy single relay configuration"
        );

        Ok(Self {
            relays: vec![relay],
            skipped,
            legacy: true,
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RelayConfig> {
        self.relays.iter()
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Numbered indices that were configured but unusable.
    pub fn skipped(&self) -> &[usize] {
        &self.skipped
    }

    /// Whether the set came from the legacy unnumbered pair.
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }
}

impl IntoIterator for RelayConfigSet {
    type Item = RelayConfig;
    type IntoIter = std::vec::IntoIter<RelayConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.relays.into_iter()
    }
}

impl<'a> IntoIterator for &'a RelayConfigSet {
    type Item = &'a RelayConfig;
    type IntoIter = std::slice::Iter<'a, RelayConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.relays.iter()
    }
}
