//! Remarket configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RemarketError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemarketConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl RemarketConfig {
    /// Load config from the default path (~/.remarket/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RemarketError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RemarketError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RemarketError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Remarket home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".remarket")
    }
}

/// HTTP/WebSocket gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8990
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Durable storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the SQLite databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    RemarketConfig::home_dir()
        .join("data")
        .to_string_lossy()
        .into_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Scheduler and campaign-drip tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Recipients processed per campaign job invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delay before a campaign job re-fires when recipients remain.
    #[serde(default = "default_drip_delay_secs")]
    pub drip_delay_secs: u64,
    /// Anti-ban jitter bounds between recipient sends, in milliseconds.
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
    /// Retry ceiling for unclassified provider errors.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff on unclassified errors.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
}

fn default_batch_size() -> usize {
    5
}
fn default_drip_delay_secs() -> u64 {
    10
}
fn default_jitter_min_ms() -> u64 {
    300
}
fn default_jitter_max_ms() -> u64 {
    1500
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            drip_delay_secs: default_drip_delay_secs(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
            max_attempts: default_max_attempts(),
            retry_base_secs: default_retry_base_secs(),
        }
    }
}

/// Per-channel credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Fallback bot token used when a job payload carries none.
    pub bot_token: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RemarketConfig::default();
        assert_eq!(config.gateway.port, 8990);
        assert_eq!(config.scheduler.batch_size, 5);
        assert_eq!(config.scheduler.drip_delay_secs, 10);
        assert!(config.channels.telegram.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [gateway]
            port = 9000

            [scheduler]
            batch_size = 10
            jitter_min_ms = 0
            jitter_max_ms = 0

            [channels.telegram]
            bot_token = "123:abc"
        "#;
        let config: RemarketConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.scheduler.max_attempts, 3);
        let tg = config.channels.telegram.unwrap();
        assert_eq!(tg.bot_token, "123:abc");
        assert!(tg.enabled);
    }
}
