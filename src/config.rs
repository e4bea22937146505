//! Configuration file handling.
//!
//! The gateway reads a TOML file with a `[gateway]` section for global
//! tunables and one `[[frontends]]` table per attached tuner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::frontend::lnb::LnbConfig;
use crate::frontend::pool::PoolOptions;
use crate::remux::MAX_TRANSPONDER_RETRIES;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Tuners to attach at startup.
    #[serde(default)]
    pub frontends: Vec<FrontendSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Channel list file.
    pub channels: PathBuf,

    /// Demux kernel buffer size in bytes, 0 keeps the driver's default.
    pub demux_buffer_size: usize,

    /// Read timeout in milliseconds before a transponder is retuned.
    pub read_timeout_ms: u64,

    /// Retunes allowed per transponder before subscribers are dropped.
    pub max_retries: u32,

    /// Directory for log files.
    pub log_dir: PathBuf,

    /// Days to keep rotated log files.
    pub log_retention_days: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        let pool = PoolOptions::default();
        GatewaySection {
            channels: PathBuf::from("channels.conf"),
            demux_buffer_size: pool.demux_buffer_size,
            read_timeout_ms: pool.read_timeout.as_millis() as u64,
            max_retries: MAX_TRANSPONDER_RETRIES,
            log_dir: PathBuf::from("logs"),
            log_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendSection {
    pub adapter: u32,
    #[serde(default)]
    pub frontend: u32,
    #[serde(default)]
    pub lnb: LnbConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Pool tunables derived from the `[gateway]` section.
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            demux_buffer_size: self.gateway.demux_buffer_size,
            read_timeout: Duration::from_millis(self.gateway.read_timeout_ms),
        }
    }
}
