//! Per-channel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use super::{clamp_tick_rate, DEFAULT_TICK_RATE};

/// Default ceiling for a single bulk transmission (64 MiB)
const DEFAULT_MAX_TRANSMISSION_LEN: usize = 64 * 1024 * 1024;

/// Timing and limits for a single channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// I/O task ticks per second, clamped to 2..=128
    pub tick_rate: u32,

    /// Deadline for a single socket write or bulk read
    #[serde(with = "duration_millis")]
    pub io_timeout: Duration,

    /// Deadline for establishing the TCP connection
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// How long `close_connection` waits for the I/O task to stop
    #[serde(with = "duration_millis")]
    pub close_timeout: Duration,

    /// Multiplier on the tick rate giving the keepalive threshold in ticks
    ///
    /// A Ping is queued once `keepalive_multiplier * tick_rate` ticks pass
    /// without an outbound frame.
    pub keepalive_multiplier: u32,

    /// Largest inbound transmission accepted
    pub max_transmission_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            io_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(4),
            keepalive_multiplier: 2,
            max_transmission_len: DEFAULT_MAX_TRANSMISSION_LEN,
        }
    }
}

impl ChannelConfig {
    /// Tick rate after clamping
    pub fn effective_tick_rate(&self) -> u32 {
        clamp_tick_rate(self.tick_rate.min(i32::MAX as u32) as i32)
    }

    /// Keepalive threshold in ticks at `tick_rate`
    pub fn keepalive_threshold(&self, tick_rate: u32) -> u32 {
        self.keepalive_multiplier.saturating_mul(tick_rate)
    }
}

/// Interval between two ticks at `tick_rate` ticks per second
pub(crate) fn tick_interval(tick_rate: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(tick_rate.max(1)))
}
