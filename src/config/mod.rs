use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::media::{DownloadMode, Quality};

const CONFIG_ENV_VAR: &str = "TUBEGATE_CONFIG";
const APP_DIR: &str = "tubegate";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `text` or `json`
    pub format: String,
    /// Directory for the daily log file. An empty value disables file logging.
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            directory: PathBuf::from("logs"),
        }
    }
}

impl LoggingConfig {
    pub fn file_directory(&self) -> Option<&Path> {
        Some(self.directory.as_path()).filter(|dir| !dir.as_os_str().is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub download_path: String,
    pub default_quality: Quality,
    pub default_subtitle_langs: Vec<String>,
    pub default_download_mode: DownloadMode,
    pub recent_urls: Vec<String>,
    pub max_recent_urls: usize,
    pub subtitle_delay_secs: u64,
    pub cookies_file: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_location: Option<PathBuf>,
    pub player_client: Option<String>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_path: "downloads".to_string(),
            default_quality: Quality::Best,
            default_subtitle_langs: vec!["ko".to_string()],
            default_download_mode: DownloadMode::VideoOnly,
            recent_urls: Vec::new(),
            max_recent_urls: 10,
            subtitle_delay_secs: 3,
            cookies_file: None,
            ytdlp_path: None,
            ffmpeg_location: None,
            player_client: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn ytdlp_binary(&self) -> PathBuf {
        self.ytdlp_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("yt-dlp"))
    }
}

/// Owns the persisted [`Config`] and writes every change back to disk.
pub struct ConfigManager {
    path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Missing files give defaults. Corrupt files are reported and replaced
    /// by defaults on the next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let config = if path.exists() {
            match Config::from_file(&path) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("{:#}. Falling back to defaults", e);
                    Config::default()
                }
            }
        } else {
            info!("No config file at {}, using defaults", path.display());
            Config::default()
        };

        Self { path, config }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(&self.config).context("Failed to serialize config")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }

    pub fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Config),
    {
        f(&mut self.config);
        self.save()
    }

    /// Move `url` to the front of the recent list, keeping at most
    /// `max_recent_urls` entries.
    pub fn add_recent_url(&mut self, url: &str) -> Result<()> {
        self.update(|config| {
            config.recent_urls.retain(|existing| existing != url);
            config.recent_urls.insert(0, url.to_string());
            config.recent_urls.truncate(config.max_recent_urls);
        })
    }

    pub fn recent_urls(&self) -> &[String] {
        &self.config.recent_urls
    }

    pub fn reset_to_defaults(&mut self) -> Result<()> {
        info!("Resetting configuration to defaults");
        self.update(|config| *config = Config::default())
    }
}

/// Pick the config file: `--config`, `TUBEGATE_CONFIG`, an existing XDG or
/// `~/.config` file, then the platform config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return config_path;
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = home.join(".config").join(APP_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return config_path;
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}
