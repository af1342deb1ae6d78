use crate::core::bluetooth::DEFAULT_SCAN_DURATION_SECS;
use crate::utils::ensure_directory_exists;
use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

pub const CONFIG_FILE_NAME: &str = "scanner_config.json";

/// Scanner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Keep dice from a previous scan when a new one starts
    pub keep_previous: bool,
    /// Ask the radio to report every advertisement instead of only changed ones
    pub allow_duplicates: bool,
    /// Advertisements weaker than this (in dBm) are ignored. `None` accepts everything.
    pub min_rssi: Option<i16>,
    /// Stop scanning after this many seconds. `None` scans until interrupted.
    pub scan_duration_secs: Option<u64>,
    /// Default log level, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            keep_previous: false,
            allow_duplicates: false,
            min_rssi: None,
            scan_duration_secs: Some(DEFAULT_SCAN_DURATION_SECS),
            log_level: "info".to_string(),
        }
    }
}

impl ScannerConfig {
    /// Loads the config from a configuration file.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!(
                "Scanner config file not found at {:?}, using default.",
                file_path_str
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Scanner config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            if !config_dir.as_os_str().is_empty() {
                ensure_directory_exists(config_dir).await?;
            }
        }
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize scanner config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Scanner config saved to {:?}", file_path_str);
        Ok(())
    }

    /// The configured log level, falling back to `info` when it cannot be parsed
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScannerConfig::load_config(&dir.path().join(CONFIG_FILE_NAME))
            .await
            .unwrap();
        assert_eq!(config, ScannerConfig::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = ScannerConfig {
            keep_previous: true,
            allow_duplicates: true,
            min_rssi: Some(-80),
            scan_duration_secs: None,
            log_level: "debug".to_string(),
        };
        config.save_config(&path).await.unwrap();
        assert_eq!(ScannerConfig::load_config(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, r#"{ "min_rssi": -70 }"#).await.unwrap();

        let config = ScannerConfig::load_config(&path).await.unwrap();
        assert_eq!(config.min_rssi, Some(-70));
        assert!(!config.keep_previous);
        assert_eq!(config.scan_duration_secs, Some(DEFAULT_SCAN_DURATION_SECS));
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(ScannerConfig::load_config(&path).await.is_err());
    }

    #[test]
    fn test_level_filter() {
        let mut config = ScannerConfig::default();
        assert_eq!(config.level_filter(), log::LevelFilter::Info);
        config.log_level = "TRACE".to_string();
        assert_eq!(config.level_filter(), log::LevelFilter::Trace);
        config.log_level = "loud".to_string();
        assert_eq!(config.level_filter(), log::LevelFilter::Info);
    }
}
