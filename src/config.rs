//! Configuration management.
//!
//! All runtime parameters are fixed at startup: broker endpoint and topics,
//! audio format, capture storage root, control-plane bind address and the
//! scheduler periods. Loaded from a TOML file via the `config` crate and
//! deserialized into [`Settings`]; there is no hot reload.

use crate::error::{AppResult, CapError};
use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log_level: String,
    pub broker: BrokerSettings,
    pub audio: AudioSettings,
    pub storage: StorageSettings,
    pub server: ServerSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// Base client identifier; a random hex suffix is appended per connect.
    pub client_id: String,
    pub tx_topic: String,
    pub rx_topic: String,
    pub username: String,
    pub password: String,
    #[serde(with = "humantime_serde")]
    pub publish_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub reconnect_backoff: Duration,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    /// Bytes moved from the source per capture tick.
    pub chunk_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub capture_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerSettings {
    /// Telemetry acquisition period.
    #[serde(with = "humantime_serde")]
    pub telemetry_period: Duration,
    /// Floor delay of the publisher service loop.
    #[serde(with = "humantime_serde")]
    pub publisher_floor: Duration,
    /// Floor delay of the capture pump loop.
    #[serde(with = "humantime_serde")]
    pub capture_floor: Duration,
    /// Bounded wait for shared-slot lock acquisition and source reads.
    #[serde(with = "humantime_serde")]
    pub lock_wait: Duration,
}

impl Settings {
    pub fn new(config_name: Option<&str>) -> AppResult<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(CapError::Config)?;

        let settings: Settings = s.try_deserialize().map_err(CapError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string. Used by tests and tooling.
    pub fn from_toml_str(toml_str: &str) -> AppResult<Self> {
        let settings: Settings = toml::from_str(toml_str)
            .map_err(|e| CapError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> AppResult<()> {
        if self.audio.bit_depth % 8 != 0 || self.audio.bit_depth == 0 {
            return Err(CapError::Configuration(format!(
                "bit_depth must be a positive multiple of 8, got {}",
                self.audio.bit_depth
            )));
        }
        if self.audio.channels == 0 || self.audio.channels > 2 {
            return Err(CapError::Configuration(format!(
                "channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }
        if self.audio.chunk_bytes == 0 {
            return Err(CapError::Configuration("chunk_bytes must be non-zero".into()));
        }
        Ok(())
    }
}
