//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAY_HOST, RELAY_PORT, RELAY_API_KEY)
//! - TOML configuration file

use anyhow::{Context, Result};
use relay_core::history::DEFAULT_HISTORY_LIMIT;
use relay_core::{HistoryConfig as CoreHistoryConfig, RegistryConfig, RelayConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

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

    /// History retention.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Remote control (raw notification) policy.
    #[serde(default)]
    pub remote_control: RemoteControlConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket subscription endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// History retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages returned when a query gives no `take`.
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,

    /// Per-channel cap; unbounded when absent.
    #[serde(default)]
    pub max_messages_per_channel: Option<usize>,
}

/// Remote control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteControlConfig {
    /// Reject raw notifications from unauthenticated callers.
    #[serde(default)]
    pub require_auth: bool,

    /// Bearer key that marks a request as authenticated.
    #[serde(default = "default_api_key")]
    pub api_key: Option<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum simultaneous subscriptions per user.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_user: usize,

    /// Maximum channels joined by one subscription.
    #[serde(default = "default_max_channels")]
    pub max_channels_per_subscription: usize,

    /// Maximum message text size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
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

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RELAY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_api_key() -> Option<String> {
    std::env::var("RELAY_API_KEY").ok().filter(|k| !k.is_empty())
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_max_subscriptions() -> usize {
    32
}

fn default_max_channels() -> usize {
    100
}

fn default_max_message_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            history: HistoryConfig::default(),
            remote_control: RemoteControlConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
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

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_messages_per_channel: None,
        }
    }
}

impl Default for RemoteControlConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            api_key: default_api_key(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_user: default_max_subscriptions(),
            max_channels_per_subscription: default_max_channels(),
            max_message_size: default_max_message_size(),
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

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
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

    /// Relay policy derived from this configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            require_auth_for_remote_control: self.remote_control.require_auth,
        }
    }

    /// History store configuration.
    #[must_use]
    pub fn history_config(&self) -> CoreHistoryConfig {
        CoreHistoryConfig {
            default_limit: self.history.default_limit,
            max_messages_per_channel: self.history.max_messages_per_channel,
        }
    }

    /// Subscription registry configuration.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_subscriptions_per_user: self.limits.max_subscriptions_per_user,
            max_channels_per_subscription: self.limits.max_channels_per_subscription,
        }
    }
}
