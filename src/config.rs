//! Configuration management

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::client::{DEFAULT_PORT, REQUEST_TIMEOUT};
use crate::error::ConfigError;

/// Per-device configuration. Each adapter instance carries its own copy;
/// nothing here is process-global.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// IP address or hostname of the Channels app device
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval() -> u64 {
    10
}

impl DeviceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Surface invalid configuration to the caller instead of deferring it
    /// to the first poll.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        // A request that outlives the poll interval would stall the next cycle
        if self.poll_interval() <= REQUEST_TIMEOUT {
            return Err(ConfigError::PollIntervalTooShort(REQUEST_TIMEOUT));
        }
        Ok(())
    }
}

/// Load configuration from an optional `channels-bridge` config file,
/// overridden by `CHANNELS_*` environment variables (CHANNELS_HOST,
/// CHANNELS_PORT, CHANNELS_POLL_INTERVAL_SECS).
pub fn load_config() -> Result<DeviceConfig> {
    let config = ::config::Config::builder()
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("poll_interval_secs", default_poll_interval() as i64)?
        .add_source(::config::File::with_name("channels-bridge").required(false))
        .add_source(::config::Environment::with_prefix("CHANNELS").try_parsing(true))
        .build()?;

    let config: DeviceConfig = config.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
