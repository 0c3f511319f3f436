//! Chat server and client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use nc_channel::config::serde_utils::duration_millis;
use nc_channel::{ChannelConfig, ListenerConfig};

/// Port the chat server listens on by default
pub const DEFAULT_PORT: u16 = 920;

/// Configuration for the chat server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Connections accepted from a single IP address
    pub max_connections_per_ip: usize,

    /// Listener settings
    pub listener: ListenerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 3,
            listener: ListenerConfig {
                bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
                ..ListenerConfig::default()
            },
        }
    }
}

/// Configuration for the chat client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Username to log in with; prompted for when absent
    pub username: Option<String>,

    /// Backoff between connection attempts
    pub backoff: BackoffConfig,

    /// Channel settings
    pub channel: ChannelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: None,
            backoff: BackoffConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections_per_ip, 3);
        assert_eq!(config.listener.bind_address, "0.0.0.0:920");
        assert_eq!(config.listener.tick_rate, 32);
    }

    #[test]
    fn test_client_config_from_toml() {
        let toml_str = r#"
            host = "chat.example.net"
            username = "alice"

            [backoff]
            initial = 500
        "#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "chat.example.net");
        assert_eq!(config.port, 920);
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.backoff.initial, Duration::from_millis(500));
        assert_eq!(config.backoff.max, Duration::from_secs(30));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");

        let mut config = ServerConfig::default();
        config.max_connections_per_ip = 1;
        nc_channel::config::save_config(&path, &config).unwrap();

        let loaded: ServerConfig = nc_channel::config::load_config(&path).unwrap();
        assert_eq!(loaded.max_connections_per_ip, 1);
        assert_eq!(loaded.listener.bind_address, "0.0.0.0:920");
    }
}
