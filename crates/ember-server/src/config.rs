//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (EMBER_HOST, EMBER_PORT, EMBER_CONFIG)
//! - TOML configuration file

use anyhow::{Context, Result};
use ember_core::{BurnAudience, BurnConfig, BurnPolicy, RouterConfig, RoutingMode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Burn message configuration.
    #[serde(default)]
    pub burn: BurnSection,

    /// Message routing configuration.
    #[serde(default)]
    pub routing: RoutingSection,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of live connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval announced to clients, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u32,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Burn message configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnSection {
    /// `send` arms on delivery, `view` arms on `message_seen`.
    #[serde(default)]
    pub policy: BurnPolicy,

    /// Delay between arming and deletion, in milliseconds.
    #[serde(default = "default_burn_delay")]
    pub delay_ms: u64,

    /// `participants` or `everyone`.
    #[serde(default)]
    pub audience: BurnAudience,
}

/// Message routing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingSection {
    /// `direct` (presence lookup) or `channel` (joined connections).
    #[serde(default)]
    pub mode: RoutingMode,
}

// Default value functions
fn default_host() -> String {
    std::env::var("EMBER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("EMBER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(10000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u32 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_burn_delay() -> u64 {
    10_000 // 10 seconds
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            burn: BurnSection::default(),
            routing: RoutingSection::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for BurnSection {
    fn default() -> Self {
        Self {
            policy: BurnPolicy::default(),
            delay_ms: default_burn_delay(),
            audience: BurnAudience::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `EMBER_CONFIG` names an explicit file; otherwise the usual locations
    /// are searched.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// `EMBER_CONFIG` names a missing file.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("EMBER_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "ember.toml",
            "/etc/ember/ember.toml",
            "~/.config/ember/ember.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Router settings derived from the burn and routing sections.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            routing: self.routing.mode,
            burn: BurnConfig {
                policy: self.burn.policy,
                delay: Duration::from_millis(self.burn.delay_ms),
                audience: self.burn.audience,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.burn.delay_ms, 10_000);
        assert_eq!(config.burn.policy, BurnPolicy::OnSend);
        assert_eq!(config.routing.mode, RoutingMode::Direct);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 10000,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 10000);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 500

            [burn]
            policy = "view"
            delay_ms = 2500
            audience = "everyone"

            [routing]
            mode = "channel"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 500);

        let router = config.router_config();
        assert_eq!(router.routing, RoutingMode::Channel);
        assert_eq!(router.burn.policy, BurnPolicy::OnView);
        assert_eq!(router.burn.delay, Duration::from_millis(2500));
        assert_eq!(router.burn.audience, BurnAudience::Everyone);
    }

    #[test]
    fn test_heartbeat_out_of_range_rejected() {
        let config: Config = toml::from_str("[heartbeat]\ninterval_ms = 15000\n").unwrap();
        assert_eq!(config.heartbeat.interval_ms, 15_000);

        let result: Result<Config, _> =
            toml::from_str("[heartbeat]\ninterval_ms = 5000000000\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result: Result<Config, _> = toml::from_str("[burn]\npolicy = \"whenever\"\n");
        assert!(result.is_err());
    }
}
