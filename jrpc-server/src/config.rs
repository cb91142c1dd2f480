//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via JRPC_CONFIG)
//! 3. Environment variables

use jrpc_protocol::{WireMode, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistent TCP listener.
    pub network: NetworkConfig,
    /// HTTP listener.
    pub http: HttpConfig,
    /// WebSocket listener.
    pub websocket: WsConfig,
    /// Handler execution.
    pub dispatch: DispatchConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("JRPC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a `JRPC_*` variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&lookup);
        self.http.apply_overrides(&lookup);
        self.websocket.apply_overrides(&lookup);
        self.dispatch.apply_overrides(&lookup);
        self.metrics.apply_overrides(&lookup);
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.http.enabled && self.http.bind_addr == self.network.bind_addr {
            return Err(ConfigError::ValidationError(format!(
                "http.bind_addr {} collides with network.bind_addr",
                self.http.bind_addr
            )));
        }
        if self.websocket.enabled
            && (self.websocket.bind_addr == self.network.bind_addr
                || (self.http.enabled && self.websocket.bind_addr == self.http.bind_addr))
        {
            return Err(ConfigError::ValidationError(format!(
                "websocket.bind_addr {} collides with another listener",
                self.websocket.bind_addr
            )));
        }
        if self.metrics.enabled
            && (self.metrics.bind_addr == self.network.bind_addr
                || (self.http.enabled && self.metrics.bind_addr == self.http.bind_addr)
                || (self.websocket.enabled && self.metrics.bind_addr == self.websocket.bind_addr))
        {
            return Err(ConfigError::ValidationError(format!(
                "metrics.bind_addr {} collides with another listener",
                self.metrics.bind_addr
            )));
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "http.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Persistent connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Envelope delimiting on the byte stream.
    pub wire_mode: WireMode,
    /// Idle connection timeout in seconds (0 = never).
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            wire_mode: WireMode::Framed,
            idle_timeout_secs: 300,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("JRPC_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(mode) = lookup("JRPC_WIRE_MODE") {
            if let Ok(parsed) = mode.parse() {
                self.wire_mode = parsed;
            }
        }

        if let Some(timeout) = lookup("JRPC_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Some(max) = lookup("JRPC_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    /// Returns idle timeout as Duration, `None` if disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// HTTP request/response configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable the HTTP listener.
    pub enabled: bool,
    /// Address to bind the HTTP listener to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT + 1)),
            max_body_bytes: jrpc_protocol::MAX_PAYLOAD_SIZE as usize,
        }
    }
}

impl HttpConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("JRPC_HTTP_ENABLED") {
            self.enabled = parse_flag(&enabled);
        }
        if let Some(addr) = lookup("JRPC_HTTP_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Enable the WebSocket listener.
    pub enabled: bool,
    /// Address to bind the WebSocket listener to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT + 2)),
        }
    }
}

impl WsConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("JRPC_WS_ENABLED") {
            self.enabled = parse_flag(&enabled);
        }
        if let Some(addr) = lookup("JRPC_WS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Handler execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-call handler timeout in seconds (0 = unbounded).
    pub call_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
        }
    }
}

impl DispatchConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(timeout) = lookup("JRPC_CALL_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.call_timeout_secs = secs;
            }
        }
    }

    /// Returns the call timeout, `None` if unbounded.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("JRPC_METRICS_ENABLED") {
            self.enabled = parse_flag(&enabled);
        }
        if let Some(addr) = lookup("JRPC_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serializes a SocketAddr as a string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.network.wire_mode, WireMode::Framed);
        assert_eq!(config.network.idle_timeout(), Some(Duration::from_secs(300)));
        assert!(!config.http.enabled);
        assert_eq!(config.dispatch.call_timeout(), Some(Duration::from_secs(30)));
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.network.wire_mode = WireMode::Lines;
        config.http.enabled = true;

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("wire_mode: lines"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.network.wire_mode, WireMode::Lines);
        assert!(parsed.http.enabled);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed: Config = serde_yaml::from_str(
            "network:\n  bind_addr: \"0.0.0.0:9000\"\ndispatch:\n  call_timeout_secs: 0\n",
        )
        .unwrap();
        assert_eq!(parsed.network.bind_addr.port(), 9000);
        assert_eq!(parsed.network.max_connections, 1000);
        assert_eq!(parsed.dispatch.call_timeout(), None);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jrpc.yaml");

        let mut config = Config::default();
        config.metrics.enabled = true;
        config.network.max_connections = 42;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert!(loaded.metrics.enabled);
        assert_eq!(loaded.network.max_connections, 42);
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();

        let err = Config::from_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));

        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "network: [unclosed").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("JRPC_BIND", "0.0.0.0:8000"),
            ("JRPC_WIRE_MODE", "lines"),
            ("JRPC_MAX_CONNECTIONS", "7"),
            ("JRPC_IDLE_TIMEOUT", "0"),
            ("JRPC_HTTP_ENABLED", "true"),
            ("JRPC_HTTP_BIND", "0.0.0.0:8001"),
            ("JRPC_WS_ENABLED", "1"),
            ("JRPC_WS_BIND", "0.0.0.0:8002"),
            ("JRPC_CALL_TIMEOUT", "5"),
            ("JRPC_METRICS_ENABLED", "1"),
            ("JRPC_METRICS_BIND", "127.0.0.1:9999"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.network.bind_addr.port(), 8000);
        assert_eq!(config.network.wire_mode, WireMode::Lines);
        assert_eq!(config.network.max_connections, 7);
        assert_eq!(config.network.idle_timeout(), None);
        assert!(config.http.enabled);
        assert_eq!(config.http.bind_addr.port(), 8001);
        assert!(config.websocket.enabled);
        assert_eq!(config.websocket.bind_addr.port(), 8002);
        assert_eq!(config.dispatch.call_timeout(), Some(Duration::from_secs(5)));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.bind_addr.port(), 9999);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unparseable_overrides_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "JRPC_BIND" => Some("not an address".to_string()),
            "JRPC_WIRE_MODE" => Some("smoke-signals".to_string()),
            _ => None,
        });
        assert_eq!(config.network.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.network.wire_mode, WireMode::Framed);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.http.enabled = true;
        config.http.bind_addr = config.network.bind_addr;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("collides"));

        let mut config = Config::default();
        config.metrics.enabled = true;
        config.metrics.bind_addr = config.network.bind_addr;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.websocket.enabled = true;
        config.websocket.bind_addr = config.network.bind_addr;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("websocket.bind_addr"));
    }
}
