use std::str::FromStr;
use std::time::Duration;

/// Relay configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development with the
/// execution service on `127.0.0.1:7860`.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// WebSocket base of the upstream execution service.
    pub upstream_ws_url: String,
    /// HTTP base of the upstream, probed by `/health`.
    pub upstream_http_url: String,
    /// Bound on opening the upstream leg of a link.
    pub upstream_connect_timeout: Duration,
    /// Bound on flushing close frames when a link ends.
    pub link_close_timeout: Duration,
    /// Bound on the upstream health probe.
    pub health_probe_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            upstream_ws_url: "ws://127.0.0.1:7860".into(),
            upstream_http_url: "http://127.0.0.1:7860".into(),
            upstream_connect_timeout: Duration::from_secs(10),
            link_close_timeout: Duration::from_secs(5),
            health_probe_timeout: Duration::from_secs(3),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `HOST`                          | `0.0.0.0`               |
    /// | `PORT`                          | `3000`                  |
    /// | `UPSTREAM_WS_URL`               | `ws://127.0.0.1:7860`   |
    /// | `UPSTREAM_HTTP_URL`             | `http://127.0.0.1:7860` |
    /// | `UPSTREAM_CONNECT_TIMEOUT_SECS` | `10`                    |
    /// | `LINK_CLOSE_TIMEOUT_SECS`       | `5`                     |
    /// | `HEALTH_PROBE_TIMEOUT_SECS`     | `3`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse_or(&lookup, "PORT", defaults.port)?;

        let upstream_ws_url = lookup("UPSTREAM_WS_URL")
            .unwrap_or(defaults.upstream_ws_url)
            .trim_end_matches('/')
            .to_string();
        let upstream_http_url = lookup("UPSTREAM_HTTP_URL")
            .unwrap_or(defaults.upstream_http_url)
            .trim_end_matches('/')
            .to_string();

        let upstream_connect_timeout_secs: u64 = parse_or(
            &lookup,
            "UPSTREAM_CONNECT_TIMEOUT_SECS",
            defaults.upstream_connect_timeout.as_secs(),
        )?;
        let link_close_timeout_secs: u64 = parse_or(
            &lookup,
            "LINK_CLOSE_TIMEOUT_SECS",
            defaults.link_close_timeout.as_secs(),
        )?;
        let health_probe_timeout_secs: u64 = parse_or(
            &lookup,
            "HEALTH_PROBE_TIMEOUT_SECS",
            defaults.health_probe_timeout.as_secs(),
        )?;

        Ok(Self {
            host,
            port,
            upstream_ws_url,
            upstream_http_url,
            upstream_connect_timeout: Duration::from_secs(upstream_connect_timeout_secs),
            link_close_timeout: Duration::from_secs(link_close_timeout_secs),
            health_probe_timeout: Duration::from_secs(health_probe_timeout_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}
