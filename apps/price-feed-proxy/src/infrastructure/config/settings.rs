//! Proxy Configuration Settings
//!
//! Configuration types for the price feed proxy, loaded from environment
//! variables. Unset variables take their defaults; set but unparsable or
//! out-of-range values are rejected.

use std::time::Duration;

use crate::application::services::RegistryConfig;
use crate::domain::feed::DEFAULT_EXCHANGE;

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: 4000,
            health_port: 8083,
        }
    }
}

/// Session and subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Pause between consecutive reads of one feed.
    pub poll_interval: Duration,
    /// Exchange used when a subscribe request omits it.
    pub default_exchange: String,
    /// Samples retained per session for slow subscribers.
    pub broadcast_capacity: usize,
    /// Outbound messages buffered per gRPC stream.
    pub client_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            default_exchange: DEFAULT_EXCHANGE.to_string(),
            broadcast_capacity: 64,
            client_buffer: 32,
        }
    }
}

impl SessionSettings {
    /// Registry settings derived from these.
    #[must_use]
    pub const fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            poll_interval: self.poll_interval,
            broadcast_capacity: self.broadcast_capacity,
        }
    }
}

/// Upstream page source settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Origin of the symbol pages, without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.tradingview.com".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Session settings.
    pub session: SessionSettings,
    /// Page source settings.
    pub source: SourceSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            grpc_port: env.parse("PRICE_FEED_GRPC_PORT", defaults.server.grpc_port)?,
            health_port: env.parse("PRICE_FEED_HEALTH_PORT", defaults.server.health_port)?,
        };

        let poll_interval_ms = env.positive(
            "PRICE_FEED_POLL_INTERVAL_MS",
            duration_millis(defaults.session.poll_interval),
        )?;
        let default_exchange = env
            .string("PRICE_FEED_DEFAULT_EXCHANGE")
            .map_or(defaults.session.default_exchange, |v| v.to_uppercase());

        let session = SessionSettings {
            poll_interval: Duration::from_millis(poll_interval_ms),
            default_exchange,
            broadcast_capacity: env.positive(
                "PRICE_FEED_BROADCAST_CAPACITY",
                defaults.session.broadcast_capacity,
            )?,
            client_buffer: env.positive("PRICE_FEED_CLIENT_BUFFER", defaults.session.client_buffer)?,
        };

        let source = SourceSettings {
            base_url: env
                .string("PRICE_FEED_SOURCE_BASE_URL")
                .map_or(defaults.source.base_url, |v| v.trim_end_matches('/').to_string()),
            request_timeout: Duration::from_secs(env.positive(
                "PRICE_FEED_SOURCE_TIMEOUT_SECS",
                defaults.source.request_timeout.as_secs(),
            )?),
        };

        Ok(Self {
            server,
            session,
            source,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable is set but cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: err.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(key, default)?;
        if value > T::default() {
            Ok(value)
        } else {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: self.string(key).unwrap_or_default(),
                reason: "must be greater than zero".to_string(),
            })
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<FeedConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        FeedConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, FeedConfig::default());
        assert_eq!(config.server.grpc_port, 4000);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.session.poll_interval, Duration::from_millis(5000));
        assert_eq!(config.session.default_exchange, "BINANCE");
        assert_eq!(config.session.broadcast_capacity, 64);
        assert_eq!(config.session.client_buffer, 32);
        assert_eq!(config.source.base_url, "https://www.tradingview.com");
        assert_eq!(config.source.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("PRICE_FEED_GRPC_PORT", "5000"),
            ("PRICE_FEED_POLL_INTERVAL_MS", "250"),
            ("PRICE_FEED_DEFAULT_EXCHANGE", "coinbase"),
            ("PRICE_FEED_SOURCE_BASE_URL", "http://localhost:9000/"),
        ])
        .unwrap();

        assert_eq!(config.server.grpc_port, 5000);
        assert_eq!(config.session.poll_interval, Duration::from_millis(250));
        assert_eq!(config.session.default_exchange, "COINBASE");
        assert_eq!(config.source.base_url, "http://localhost:9000");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("PRICE_FEED_DEFAULT_EXCHANGE", "  ")]).unwrap();
        assert_eq!(config.session.default_exchange, "BINANCE");
    }

    #[test_case("PRICE_FEED_GRPC_PORT", "70000" ; "port out of range")]
    #[test_case("PRICE_FEED_POLL_INTERVAL_MS", "0" ; "zero interval")]
    #[test_case("PRICE_FEED_POLL_INTERVAL_MS", "fast" ; "non numeric interval")]
    #[test_case("PRICE_FEED_BROADCAST_CAPACITY", "0" ; "zero capacity")]
    #[test_case("PRICE_FEED_CLIENT_BUFFER", "-1" ; "negative buffer")]
    #[test_case("PRICE_FEED_SOURCE_TIMEOUT_SECS", "0" ; "zero timeout")]
    fn rejects_invalid(key: &str, value: &str) {
        let err = config_from(&[(key, value)]).unwrap_err();
        let ConfigError::InvalidValue { key: got, .. } = err;
        assert_eq!(got, key);
    }

    #[test]
    fn registry_config_mirrors_session_settings() {
        let settings = SessionSettings {
            poll_interval: Duration::from_millis(100),
            broadcast_capacity: 4,
            ..SessionSettings::default()
        };
        let registry = settings.registry_config();
        assert_eq!(registry.poll_interval, Duration::from_millis(100));
        assert_eq!(registry.broadcast_capacity, 4);
    }
}
