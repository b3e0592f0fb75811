use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub recordings_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between reconciliation ticks.
    pub check_interval_seconds: u64,
    /// Seconds to wait for a capture process to exit after a graceful stop
    /// request before it is force-killed.
    pub stop_grace_seconds: u64,
    /// Capture binary invoked for each recording.
    pub ffmpeg_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./m3u8-recorder.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                recordings_path: PathBuf::from("./data/recordings"),
            },
            scheduler: SchedulerConfig {
                check_interval_seconds: 30,
                stop_grace_seconds: 10,
                ffmpeg_command: "ffmpeg".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            let config = toml::from_str(&contents).map_err(|e| AppError::Configuration {
                message: format!("{}: {}", config_file, e),
            })?;
            Ok(config)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all(&default_config.storage.recordings_path)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}
