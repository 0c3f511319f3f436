//! Listener configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use super::{clamp_tick_rate, ChannelConfig, DEFAULT_TICK_RATE};

/// Configuration for a [`Listener`](crate::Listener)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address to accept connections on
    pub bind_address: String,

    /// Tick rate handed to every accepted channel and announced to its peer
    pub tick_rate: u32,

    /// How often dead channels are dropped from the registry
    #[serde(with = "duration_millis")]
    pub reap_interval: Duration,

    /// Settings for accepted channels
    pub channel: ChannelConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:920".to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            reap_interval: Duration::from_secs(1),
            channel: ChannelConfig::default(),
        }
    }
}

impl ListenerConfig {
    /// Channel configuration for an accepted peer, carrying the listener tick rate
    pub fn accepted_channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            tick_rate: clamp_tick_rate(self.tick_rate.min(i32::MAX as u32) as i32),
            ..self.channel.clone()
        }
    }
}
