//! Node configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (ARENA_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use arena_core::{GossipConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Human-readable node name, used in logs.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Router configuration.
    #[serde(default)]
    pub router: RouterSection,

    /// Presence gossip configuration.
    #[serde(default)]
    pub gossip: GossipSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Name of the control channel replicating the user directory.
    #[serde(default = "default_control_channel")]
    pub control_channel: String,

    /// Reconnect key lifetime in seconds.
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: u64,

    /// Whether a channel closes when its last local member leaves.
    #[serde(default = "default_true")]
    pub auto_close_empty_channels: bool,
}

/// Presence gossip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipSection {
    /// Name of the shared gossip channel.
    #[serde(default = "default_gossip_channel")]
    pub channel: String,

    /// Id key lifetime in seconds.
    #[serde(default = "default_key_timeout")]
    pub key_timeout_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_node_name() -> String {
    std::env::var("ARENA_NODE_NAME").unwrap_or_else(|_| "arena-node".to_string())
}

fn default_control_channel() -> String {
    std::env::var("ARENA_CONTROL_CHANNEL").unwrap_or_else(|_| "__ROUTER_CONTROL".to_string())
}

fn default_key_ttl() -> u64 {
    std::env::var("ARENA_KEY_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(120)
}

fn default_gossip_channel() -> String {
    std::env::var("ARENA_GOSSIP_CHANNEL").unwrap_or_else(|_| "__ID_GOSSIP".to_string())
}

fn default_key_timeout() -> u64 {
    std::env::var("ARENA_KEY_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(120)
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    std::env::var("ARENA_METRICS_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9090)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            router: RouterSection::default(),
            gossip: GossipSection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            control_channel: default_control_channel(),
            key_ttl_secs: default_key_ttl(),
            auto_close_empty_channels: true,
        }
    }
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            channel: default_gossip_channel(),
            key_timeout_secs: default_key_timeout(),
        }
    }
}

impl Default for MetricsSection {
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
    /// `ARENA_CONFIG` names an explicit file; otherwise well-known paths
    /// are probed before falling back to defaults with environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("ARENA_CONFIG") {
            return Self::from_file(&path);
        }

        let config_paths = ["arena.toml", "/etc/arena/arena.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

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

    /// Router configuration for `arena-core`.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            control_channel: self.router.control_channel.clone(),
            key_ttl: Duration::from_secs(self.router.key_ttl_secs),
            auto_close_empty_channels: self.router.auto_close_empty_channels,
        }
    }

    /// Gossip configuration for `arena-core`.
    #[must_use]
    pub fn gossip_config(&self) -> GossipConfig {
        GossipConfig {
            channel: self.gossip.channel.clone(),
            key_timeout: Duration::from_secs(self.gossip.key_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.router.key_ttl_secs, 120);
        assert!(config.router.auto_close_empty_channels);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            node_name = "arena-eu-1"

            [router]
            key_ttl_secs = 30

            [gossip]
            channel = "__PRESENCE"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node_name, "arena-eu-1");
        assert_eq!(config.router.key_ttl_secs, 30);
        assert_eq!(config.gossip.channel, "__PRESENCE");
        assert_eq!(config.gossip.key_timeout_secs, 120);
    }

    #[test]
    fn test_core_config_conversion() {
        let config = Config::default();
        let router = config.router_config();
        assert_eq!(router.key_ttl, Duration::from_secs(120));
        assert_eq!(router.control_channel, config.router.control_channel);
    }
}
