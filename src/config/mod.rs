//! # Configuration Management Module
//!
//! Settings for the message base host, loaded from a TOML file.
//!
//! The configuration is organized into logical sections:
//!
//! - [`BbsConfig`] - Station identity
//! - [`StorageConfig`] - Where message bases live and how they are opened
//! - [`MaintenanceConfig`] - Scheduled pack and archive runs
//! - [`LoggingConfig`] - Logging level and file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jambbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Message bases under {}", config.storage.data_dir);
//!
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bbs]
//! name = "My BBS"
//! sysop = "sysop"
//!
//! [storage]
//! data_dir = "./data"
//! max_message_size = 16384
//! lock_timeout_ms = 5000
//! on_corruption = "recreate"
//!
//! [maintenance]
//! enabled = true
//! frequency = "daily"
//! pack_threshold_percent = 20
//! backup_dir = "./data/backups"
//!
//! [maintenance.retention]
//! daily_count = 7
//! weekly_count = 4
//! monthly_count = 12
//! automatic_count = 24
//! keep_manual = true
//!
//! [logging]
//! level = "info"
//! file = "jambbs.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::storage::backup::RetentionPolicy;
use crate::storage::jam::CorruptionPolicy;
use crate::storage::maintenance::MaintenanceFrequency;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bbs: BbsConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbsConfig {
    pub name: String,
    pub sysop: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Largest message body accepted for posting, in bytes.
    pub max_message_size: usize,
    /// How long a mutating call waits for a base's exclusive lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// What opening a damaged base does.
    #[serde(default)]
    pub on_corruption: CorruptionPolicy,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub frequency: MaintenanceFrequency,
    /// Pack an area once this share of its stored headers is deleted.
    #[serde(default = "default_pack_threshold")]
    pub pack_threshold_percent: u8,
    pub backup_dir: String,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

fn default_pack_threshold() -> u8 {
    20
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: MaintenanceFrequency::Daily,
            pack_threshold_percent: default_pack_threshold(),
            backup_dir: "./data/backups".to_string(),
            retention: RetentionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        if config.maintenance.pack_threshold_percent > 100 {
            return Err(anyhow!(
                "Invalid pack_threshold_percent {} in {} (must be 0-100)",
                config.maintenance.pack_threshold_percent,
                path
            ));
        }

        Ok(config)
    }

    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bbs: BbsConfig {
                name: "jambbs Station".to_string(),
                sysop: "sysop".to_string(),
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                max_message_size: 16 * 1024,
                lock_timeout_ms: default_lock_timeout_ms(),
                on_corruption: CorruptionPolicy::Recreate,
            },
            maintenance: MaintenanceConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("jambbs.log".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.storage.lock_timeout_ms, 5000);
        assert_eq!(parsed.storage.on_corruption, CorruptionPolicy::Recreate);
        assert_eq!(parsed.maintenance.frequency, MaintenanceFrequency::Daily);
        assert_eq!(parsed.maintenance.retention.daily_count, 7);
    }

    #[test]
    fn test_optional_sections_default() {
        let text = r#"
            [bbs]
            name = "Test"
            sysop = "op"

            [storage]
            data_dir = "/tmp/x"
            max_message_size = 100
            on_corruption = "fail"

            [logging]
            level = "debug"
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.storage.on_corruption, CorruptionPolicy::Fail);
        assert_eq!(config.storage.lock_timeout(), Duration::from_secs(5));
        assert!(!config.maintenance.enabled);
        assert_eq!(config.maintenance.pack_threshold_percent, 20);
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_frequency_names() {
        let text = r#"
            enabled = true
            frequency = "6h"
            backup_dir = "b"
        "#;
        let m: MaintenanceConfig = toml::from_str(text).unwrap();
        assert_eq!(m.frequency, MaintenanceFrequency::Every6Hours);
    }

    #[tokio::test]
    async fn test_load_rejects_bad_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.maintenance.pack_threshold_percent = 150;
        tokio::fs::write(&path, toml::to_string_pretty(&config).unwrap())
            .await
            .unwrap();
        assert!(Config::load(path.to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let config = Config::load(path).await.unwrap();
        assert_eq!(config.bbs.sysop, "sysop");
    }
}
