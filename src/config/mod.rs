//! Relay configuration.
//!
//! All configuration is read once at startup into a [`ConfigSource`], then
//! split into global [`Settings`] and the per-repository [`RelayConfigSet`].
//! Nothing reads the environment after that point.

mod relays;
mod settings;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub use relays::{RelayConfig, RelayConfigSet, MAX_RELAY_COUNT};
pub use settings::{Settings, DEFAULT_AMQP_URL, DEFAULT_FORWARD_TIMEOUT, DEFAULT_RETRY_INTERVAL};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "relay.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RELAY_CONFIG";
/// Dotenv-style file read from the working directory.
pub const DOTENV_FILE: &str = ".env";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "RELAY_LOG";

/// Broker address.
pub const AMQP_URL_KEY: &str = "RMQ_ADDR_ROOT";
/// Exchange the relay queues are bound to.
pub const EXCHANGE_KEY: &str = "RMQ_EXCHANGE_NAME";
/// Enables the shutdown-on-push behaviour when set to `1`.
pub const SHUTDOWN_ON_PUSH_KEY: &str = "SHUTDOWN_ON_GITHUB_PUSH";
/// Supervisor delay between failed sessions, in seconds.
pub const RETRY_INTERVAL_KEY: &str = "RELAY_RETRY_INTERVAL_SECS";
/// Adds jitter to the supervisor delay.
pub const RETRY_JITTER_KEY: &str = "RELAY_RETRY_JITTER";
/// Outbound request timeout, in seconds.
pub const FORWARD_TIMEOUT_KEY: &str = "RELAY_FORWARD_TIMEOUT_SECS";

/// Number of numbered relay entries.
pub const RELAY_COUNT_KEY: &str = "RELAY_COUNT";
/// Prefix of the numbered routing key entries (`DIRECT_EXCHANGE_REPO_KEY_<n>`).
pub const ROUTING_KEY_KEY: &str = "DIRECT_EXCHANGE_REPO_KEY";
/// Prefix of the numbered target URL entries (`RELAY_TARGET_URL_<n>`).
pub const TARGET_URL_KEY: &str = "RELAY_TARGET_URL";

/// Errors raised while assembling configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error(
        "No relay configuration found. Set either RELAY_COUNT with numbered \
         DIRECT_EXCHANGE_REPO_KEY_<n>/RELAY_TARGET_URL_<n> pairs or legacy \
         DIRECT_EXCHANGE_REPO_KEY and RELAY_TARGET_URL"
    )]
    NoRelays,
}

/// Flat key/value view over every configuration source.
///
/// Keys are case-insensitive; lookups trim whitespace and treat empty values
/// as absent.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    inner: ::config::Config,
}

impl ConfigSource {
    /// Load configuration from files and the environment.
    ///
    /// Sources (in order of priority, later overrides earlier):
    /// 1. `relay.yaml` in current directory (if exists)
    /// 2. File specified by `RELAY_CONFIG` environment variable (if set)
    /// 3. `.env` in current directory (if exists)
    /// 4. Process environment
    pub fn load() -> Result<Self, ConfigError> {
        let config_file = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        Self::load_from(Path::new("."), config_file.as_deref())
    }

    /// Load with `relay.yaml` and `.env` looked up in `dir`.
    fn load_from(dir: &Path, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder().add_source(
            File::from(dir.join(DEFAULT_CONFIG_FILE))
                .format(FileFormat::Yaml)
                .required(false),
        );

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(Environment::default());

        // Overrides beat every source, so the process environment is
        // checked by hand to keep it above `.env`.
        for (key, value) in read_dotenv(&dir.join(DOTENV_FILE)) {
            if std::env::var_os(&key).is_none() {
                builder = builder.set_override(key.to_lowercase(), value)?;
            }
        }

        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Build a source from explicit key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = ::config::Config::builder();
        for (key, value) in pairs {
            let value: String = value.into();
            builder = builder.set_override(key.as_ref().to_lowercase(), value)?;
        }
        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Look up a value. Missing, blank, or non-scalar values yield `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .get_string(&key.to_lowercase())
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Deserialize the whole source into `T`.
    pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConfigError> {
        Ok(self.inner.clone().try_deserialize()?)
    }
}

/// Read `KEY=value` pairs from a dotenv file.
///
/// A missing file yields nothing. Unreadable files and malformed lines are
/// logged and skipped; the remaining lines still apply.
fn read_dotenv(path: &Path) -> Vec<(String, String)> {
    let lines = match dotenvy::from_path_iter(path) {
        Ok(lines) => lines,
        Err(e) if e.not_found() => {
            debug!(path = %path.display(), "No dotenv file");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Error loading .env file");
            return Vec::new();
        }
    };

    lines
        .filter_map(|line| {
            line.inspect_err(|e| {
                warn!(path = %path.display(), error = %e, "Skipping malformed .env line");
            })
            .ok()
        })
        .collect()
}
