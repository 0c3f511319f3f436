//! Configuration management for NetChannel

mod channel;
mod listener;
pub mod serde_utils;

pub use channel::ChannelConfig;
pub use listener::ListenerConfig;

pub(crate) use channel::tick_interval;

use crate::error::ConfigError;
use std::path::Path;

/// Default tick rate in ticks per second
pub const DEFAULT_TICK_RATE: u32 = 32;

/// Lowest accepted tick rate
pub const MIN_TICK_RATE: u32 = 2;

/// Highest accepted tick rate
pub const MAX_TICK_RATE: u32 = 128;

/// Clamp a requested tick rate into the supported range
///
/// Zero selects [`DEFAULT_TICK_RATE`]; negative values clamp to the minimum.
pub fn clamp_tick_rate(rate: i32) -> u32 {
    if rate == 0 {
        return DEFAULT_TICK_RATE;
    }
    (rate.max(0) as u32).clamp(MIN_TICK_RATE, MAX_TICK_RATE)
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}
