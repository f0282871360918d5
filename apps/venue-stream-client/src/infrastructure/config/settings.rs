//! Stream Client Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment
//! variables or built directly for embedding and tests.

use std::time::Duration;

use crate::domain::streaming::ServiceKind;
use crate::infrastructure::okx::auth::OkxCredentials;
use crate::infrastructure::ws::{ConnectOptions, HeartbeatConfig, ProxyConfig};

/// Venue environment (demo vs live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Demo trading environment (simulated).
    #[default]
    Demo,
    /// Live trading environment (real money).
    Live,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LIVE" => Self::Live,
            _ => Self::Demo,
        }
    }

    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Live => "live",
        }
    }

    /// WebSocket endpoint of `service` in this environment.
    #[must_use]
    pub fn ws_url(&self, service: ServiceKind) -> String {
        let host = if self.is_live() {
            "ws.okx.com"
        } else {
            "wspap.okx.com"
        };
        format!("wss://{host}:8443/ws/v5/{}", service.as_str())
    }
}

/// Connection and resubscription timing.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Interval between `ping` probes.
    pub heartbeat_interval: Duration,
    /// Upper bound on dial plus handshake.
    pub connect_timeout: Duration,
    /// Initial resubscription delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum resubscription delay.
    pub reconnect_delay_max: Duration,
    /// Resubscription delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum resubscription attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Venue environment.
    pub environment: Environment,
    /// Which WebSocket service to talk to.
    pub service: ServiceKind,
    /// Endpoint override; when unset the environment's URL is used.
    pub ws_url: Option<String>,
    /// Login credentials.
    pub credentials: Option<OkxCredentials>,
    /// Optional HTTP CONNECT proxy.
    pub proxy: Option<ProxyConfig>,
    /// Connection timing.
    pub stream: StreamSettings,
    /// Server ports.
    pub server: ServerSettings,
    /// Instruments the binary subscribes to.
    pub instruments: Vec<String>,
}

impl ClientConfig {
    /// Configuration for an explicit endpoint with default timing.
    #[must_use]
    pub fn new(ws_url: impl Into<String>, service: ServiceKind) -> Self {
        Self {
            environment: Environment::default(),
            service,
            ws_url: Some(ws_url.into()),
            credentials: None,
            proxy: None,
            stream: StreamSettings::default(),
            server: ServerSettings::default(),
            instruments: Vec::new(),
        }
    }

    /// Replace the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: OkxCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Tunnel through an HTTP proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Replace the connection timing.
    #[must_use]
    pub fn with_stream_settings(mut self, stream: StreamSettings) -> Self {
        self.stream = stream;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is malformed, credentials are partial, or
    /// the private service is selected without credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = lookup("OKX_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let service = lookup("OKX_SERVICE")
            .map(|s| ServiceKind::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let ws_url = lookup("OKX_WS_URL").filter(|url| !url.is_empty());

        let credentials = load_credentials(&lookup)?;
        if service.requires_login() && credentials.is_none() {
            return Err(ConfigError::MissingEnvVar("OKX_API_KEY".to_string()));
        }

        let proxy = lookup("STREAM_PROXY_URL")
            .filter(|url| !url.is_empty())
            .map(|url| {
                ProxyConfig::parse(&url)
                    .map_err(|e| ConfigError::InvalidValue("STREAM_PROXY_URL".to_string(), e.to_string()))
            })
            .transpose()?;

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "STREAM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                &lookup,
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                &lookup,
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                &lookup,
                "STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                &lookup,
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(
                &lookup,
                "STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let instruments = lookup("STREAM_INSTRUMENTS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_uppercase)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            environment,
            service,
            ws_url,
            credentials,
            proxy,
            stream,
            server,
            instruments,
        })
    }

    /// Endpoint to dial.
    #[must_use]
    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| self.environment.ws_url(self.service))
    }

    /// Transport options derived from this configuration.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            proxy: self.proxy.clone(),
            connect_timeout: self.stream.connect_timeout,
            heartbeat: HeartbeatConfig::new(self.stream.heartbeat_interval),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn load_credentials(
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<OkxCredentials>, ConfigError> {
    let keys = ["OKX_API_KEY", "OKX_SECRET_KEY", "OKX_PASSPHRASE"];
    let values: Vec<Option<String>> = keys.iter().map(|key| lookup(*key)).collect();

    if values.iter().all(Option::is_none) {
        return Ok(None);
    }

    let mut fields = Vec::with_capacity(keys.len());
    for (key, value) in keys.iter().zip(values) {
        match value {
            None => return Err(ConfigError::MissingEnvVar((*key).to_string())),
            Some(v) if v.is_empty() => return Err(ConfigError::EmptyValue((*key).to_string())),
            Some(v) => fields.push(v),
        }
    }

    let mut fields = fields.into_iter();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(api_key), Some(secret_key), Some(passphrase)) => Ok(Some(OkxCredentials::new(
            api_key, secret_key, passphrase,
        ))),
        _ => Ok(None),
    }
}

fn parse_env_u16(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_env_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parse_env_f64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .filter(|v: &f64| v.is_finite())
        .unwrap_or(default)
}

fn parse_env_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test_case("live", Environment::Live)]
    #[test_case("LIVE", Environment::Live)]
    #[test_case("demo", Environment::Demo)]
    #[test_case("unknown", Environment::Demo)]
    fn environment_parsing(input: &str, expected: Environment) {
        assert_eq!(Environment::from_str_case_insensitive(input), expected);
    }

    #[test_case(Environment::Live, ServiceKind::Public, "wss://ws.okx.com:8443/ws/v5/public")]
    #[test_case(Environment::Live, ServiceKind::Private, "wss://ws.okx.com:8443/ws/v5/private")]
    #[test_case(Environment::Demo, ServiceKind::Business, "wss://wspap.okx.com:8443/ws/v5/business")]
    fn endpoint_urls(environment: Environment, service: ServiceKind, expected: &str) {
        assert_eq!(environment.ws_url(service), expected);
    }

    #[test]
    fn defaults_from_empty_environment() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.environment, Environment::Demo);
        assert_eq!(config.service, ServiceKind::Public);
        assert!(config.credentials.is_none());
        assert!(config.proxy.is_none());
        assert_eq!(config.stream, StreamSettings::default());
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.ws_url(), "wss://wspap.okx.com:8443/ws/v5/public");
    }

    #[test]
    fn full_environment() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("OKX_ENV", "live"),
            ("OKX_SERVICE", "private"),
            ("OKX_API_KEY", "key"),
            ("OKX_SECRET_KEY", "secret"),
            ("OKX_PASSPHRASE", "phrase"),
            ("STREAM_PROXY_URL", "http://127.0.0.1:7890"),
            ("STREAM_HEARTBEAT_INTERVAL_SECS", "5"),
            ("STREAM_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("STREAM_INSTRUMENTS", "btc-usdt, ETH-USDT,,"),
        ]))
        .unwrap();

        assert_eq!(config.ws_url(), "wss://ws.okx.com:8443/ws/v5/private");
        assert_eq!(config.credentials.as_ref().map(OkxCredentials::api_key), Some("key"));
        assert_eq!(config.proxy, Some(ProxyConfig::new("127.0.0.1", 7890)));
        assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.stream.reconnect_delay_initial, Duration::from_millis(250));
        assert_eq!(config.instruments, vec!["BTC-USDT", "ETH-USDT"]);
        assert_eq!(config.connect_options().heartbeat.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn url_override_wins() {
        let config =
            ClientConfig::from_lookup(lookup(&[("OKX_WS_URL", "ws://127.0.0.1:9000/ws")])).unwrap();
        assert_eq!(config.ws_url(), "ws://127.0.0.1:9000/ws");
    }

    #[test]
    fn private_service_needs_credentials() {
        let err = ClientConfig::from_lookup(lookup(&[("OKX_SERVICE", "private")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "OKX_API_KEY"));
    }

    #[test]
    fn partial_credentials_are_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("OKX_API_KEY", "key")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "OKX_SECRET_KEY"));

        let err = ClientConfig::from_lookup(lookup(&[
            ("OKX_API_KEY", "key"),
            ("OKX_SECRET_KEY", ""),
            ("OKX_PASSPHRASE", "p"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "OKX_SECRET_KEY"));
    }

    #[test]
    fn bad_proxy_is_rejected() {
        let err =
            ClientConfig::from_lookup(lookup(&[("STREAM_PROXY_URL", "socks5://h:1")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key, _) if key == "STREAM_PROXY_URL"));
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("STREAM_HEARTBEAT_INTERVAL_SECS", "soon"),
            ("STREAM_RECONNECT_DELAY_MULTIPLIER", "NaN"),
            ("STREAM_HEALTH_PORT", "99999"),
        ]))
        .unwrap();
        assert_eq!(config.stream, StreamSettings::default());
        assert_eq!(config.server.health_port, 8083);
    }
}
