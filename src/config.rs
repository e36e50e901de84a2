use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::Quality;
use crate::downloader::JobStore;
use crate::errors::{AppError, Result};

/// Android-emulator alias for the host's localhost.
pub const DEFAULT_BASE_URL: &str = "http://10.0.2.2:8000/";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub database_path: Option<PathBuf>,
    pub default_quality: Quality,
    pub proxy: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            database_path: None,
            default_quality: Quality::M4a320,
            proxy: None,
        }
    }
}

impl AppConfig {
    /// Defaults, then the user's config file, then `SPOWLO_*` variables.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            if let Err(e) = AppConfig::default().save_to(&config_path) {
                log::warn!("Could not write default config to {:?}: {}", config_path, e);
            }
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("SPOWLO"))
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;
        config.base_url = normalize_base_url(&config.base_url);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Could not find config directory".to_string(),
            ))
        })?;

        Ok(config_dir.join("spowlo").join("config.json"))
    }

    pub fn set_base_url(&mut self, url: &str) {
        self.base_url = normalize_base_url(url);
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(JobStore::default_path)
    }
}

/// Base URLs always end in `/` so relative endpoint joins keep any prefix.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}
