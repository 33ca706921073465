use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Complete agent configuration, read once at startup. No hot reload.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct AgentConfig {
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct BrokerConfig {
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_hostname")]
    pub client_id: String,
}

/// The two fixed topics: commands arrive on `inbound`, events leave on
/// `outbound`.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TopicConfig {
    pub inbound: String,
    pub outbound: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PinConfig {
    /// Button input, BCM numbering, wired to ground with internal pull-up.
    pub button: u8,
    /// LED output, BCM numbering.
    pub led: u8,
    /// Reference board sinks the LED: logical on = electrically low.
    pub led_active_low: bool,
    pub debounce_ms: u64,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            button: 17,
            led: 27,
            led_active_low: true,
            debounce_ms: 25,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TimingConfig {
    pub link_poll_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub publish_retry_delay_ms: u64,
    pub poll_window_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            link_poll_ms: 500,
            reconnect_backoff_ms: 5000,
            publish_retry_delay_ms: 10,
            poll_window_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn link_poll(&self) -> Duration {
        Duration::from_millis(self.link_poll_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn publish_retry_delay(&self) -> Duration {
        Duration::from_millis(self.publish_retry_delay_ms)
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }
}

impl AgentConfig {
    /// Loads from the given path, or `<config_dir>/pinlink/config.toml`.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => default_config_path()?,
        };
        info!(path = %path.display(), "Loading configuration");
        let raw = fs::read_to_string(&path)
            .map_err(|e| eyre!("Cannot read config {}: {}", path.display(), e))?;
        let config = toml::from_str(&raw).map_err(|e| eyre!("Invalid configuration: {}", e))?;
        Ok(config)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("pinlink").join("config.toml"))
        .ok_or_else(|| eyre!("No configuration directory available"))
}

fn default_hostname() -> String {
    "pinlink".to_string()
}

fn default_broker_port() -> u16 {
    1883
}
