use std::str::FromStr;
use std::time::Duration;

use crate::client::{ClientOptions, DEFAULT_KEEPALIVE_INTERVAL};
use crate::reconnect::ReconnectConfig;
use crate::transport::DEFAULT_CONNECT_TIMEOUT;

/// Default delay between `release` and eviction of an unused channel.
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_millis(5000);

/// Progress channel configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a relay
/// on `127.0.0.1:3000`.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base URL of the service exposing `/ws/progress/{job_id}`.
    pub base_url: String,
    /// Bound on a single WebSocket handshake.
    pub connect_timeout: Duration,
    /// Reconnect policy and keepalive interval for every client.
    pub client: ClientOptions,
    /// Delay between `release` and eviction.
    pub eviction_grace: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:3000".into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client: ClientOptions::default(),
            eviction_grace: DEFAULT_EVICTION_GRACE,
        }
    }
}

impl ChannelConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default               |
    /// |---------------------------|-----------------------|
    /// | `PROGRESS_BASE_URL`       | `ws://127.0.0.1:3000` |
    /// | `KEEPALIVE_INTERVAL_SECS` | `30` (`0` disables)   |
    /// | `RECONNECT_BASE_DELAY_MS` | `1000`                |
    /// | `RECONNECT_MAX_ATTEMPTS`  | `5`                   |
    /// | `RECONNECT_MAX_DELAY_MS`  | unset (uncapped)      |
    /// | `CONNECT_TIMEOUT_SECS`    | `10`                  |
    /// | `EVICTION_GRACE_MS`       | `5000`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = lookup("PROGRESS_BASE_URL").unwrap_or(defaults.base_url);

        let keepalive_secs: u64 = parse_or(
            &lookup,
            "KEEPALIVE_INTERVAL_SECS",
            DEFAULT_KEEPALIVE_INTERVAL.as_secs(),
        )?;
        let keepalive_interval = (keepalive_secs > 0).then(|| Duration::from_secs(keepalive_secs));

        let base_delay_ms: u64 = parse_or(&lookup, "RECONNECT_BASE_DELAY_MS", 1000)?;
        let max_attempts: u32 = parse_or(&lookup, "RECONNECT_MAX_ATTEMPTS", 5)?;
        let max_delay = match lookup("RECONNECT_MAX_DELAY_MS") {
            Some(raw) => Some(Duration::from_millis(parse_value(
                "RECONNECT_MAX_DELAY_MS",
                &raw,
            )?)),
            None => None,
        };

        let connect_timeout_secs: u64 = parse_or(
            &lookup,
            "CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout.as_secs(),
        )?;
        let eviction_grace_ms: u64 = parse_or(
            &lookup,
            "EVICTION_GRACE_MS",
            defaults.eviction_grace.as_millis() as u64,
        )?;

        Ok(Self {
            base_url,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            client: ClientOptions {
                reconnect: ReconnectConfig {
                    base_delay: Duration::from_millis(base_delay_ms),
                    max_attempts,
                    max_delay,
                },
                keepalive_interval,
            },
            eviction_grace: Duration::from_millis(eviction_grace_ms),
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => parse_value(var, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}
