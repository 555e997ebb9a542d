//! Engine configuration with validation.
//!
//! Loaded from defaults, a TOML document, or environment overrides.

use crate::codec::Codecs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Route used when none is configured.
pub const DEFAULT_ROUTE: &str = "service.name";

/// Default bound on waiting for a response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for `call_timeout` and `message_ttl`.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Route this engine serves and, by default, calls.
    pub route: String,
    /// Timeout applied to calls made without an explicit one.
    #[serde(with = "duration_serde")]
    pub call_timeout: Duration,
    /// Expiration stamped on call messages.
    #[serde(with = "duration_serde")]
    pub message_ttl: Duration,
    /// Encoding used for routes without an override.
    pub default_encoding: String,
    /// Ask the transport to reconnect after a dropped link.
    pub auto_reconnect: bool,
    /// Name given to blocking-runtime worker threads.
    pub worker_thread_name: String,
    /// Per-route encoding overrides.
    pub route_encodings: HashMap<String, String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            route: DEFAULT_ROUTE.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            message_ttl: crate::codec::DEFAULT_MESSAGE_TTL,
            default_encoding: "msgpack".to_string(),
            auto_reconnect: true,
            worker_thread_name: "rpc-worker".to_string(),
            route_encodings: HashMap::new(),
        }
    }
}

impl RpcConfig {
    /// Config serving `route`, everything else default.
    pub fn with_route(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.route.trim().is_empty() {
            return Err(ConfigError::InvalidRoute("route cannot be empty".into()));
        }

        if self.route.contains(['*', '#']) {
            return Err(ConfigError::InvalidRoute(format!(
                "route {} contains a wildcard",
                self.route
            )));
        }

        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "call_timeout cannot be 0".into(),
            ));
        }

        if self.message_ttl.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "message_ttl cannot be 0".into(),
            ));
        }

        for (name, value) in [
            ("call_timeout", self.call_timeout),
            ("message_ttl", self.message_ttl),
        ] {
            if value > MAX_TIMEOUT {
                return Err(ConfigError::InvalidTimeout(format!(
                    "{name} cannot exceed {}s (got {}s)",
                    MAX_TIMEOUT.as_secs(),
                    value.as_secs()
                )));
            }
        }

        // Encoding names resolve against the built-in registry.
        self.codecs().map(|_| ())
    }

    /// Build the codec registry this config describes.
    pub fn codecs(&self) -> Result<Codecs, ConfigError> {
        self.codecs_from(Codecs::new())
    }

    /// Apply this config's encoding choices to an existing registry.
    pub fn codecs_from(&self, mut codecs: Codecs) -> Result<Codecs, ConfigError> {
        codecs.set_default_encoding(&self.default_encoding)?;
        for (route, encoding) in &self.route_encodings {
            codecs.set_route_encoding(route, encoding)?;
        }
        codecs.set_message_ttl(self.message_ttl);
        Ok(codecs)
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `RPC_ROUTE`, `RPC_CALL_TIMEOUT`,
    /// `RPC_MESSAGE_TTL` and `RPC_ENCODING`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(route) = lookup("RPC_ROUTE") {
            config.route = route;
        }
        if let Some(timeout) = lookup("RPC_CALL_TIMEOUT") {
            config.call_timeout = duration_serde::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidTimeout(format!("RPC_CALL_TIMEOUT: {e}")))?;
        }
        if let Some(ttl) = lookup("RPC_MESSAGE_TTL") {
            config.message_ttl = duration_serde::parse_duration(&ttl)
                .map_err(|e| ConfigError::InvalidTimeout(format!("RPC_MESSAGE_TTL: {e}")))?;
        }
        if let Some(encoding) = lookup("RPC_ENCODING") {
            config.default_encoding = encoding;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Empty or malformed route
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Encoding name not in the registry
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
    /// Malformed configuration document
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Duration (de)serialization as `"30s"`, `"500ms"` or `"2m"`.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map_err(|_| "invalid minutes")
                .and_then(|m| m.checked_mul(60).ok_or("minutes overflow"))
                .map(Duration::from_secs)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
