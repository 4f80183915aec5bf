use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub recording: RecordingConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Display name submitted on the guest join page.
    pub display_name: String,
    /// Join attempts before giving up on the meeting.
    pub join_attempts: u32,
    /// Per-attempt bound covering navigation, the join click, and admission.
    pub join_timeout_seconds: u64,
    /// Fixed delay between join attempts.
    pub join_backoff_seconds: u64,
    /// Explicit chromedriver binary; discovered on PATH when unset.
    pub chromedriver_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: "Notetaker".to_string(),
            join_attempts: 3,
            join_timeout_seconds: 60,
            join_backoff_seconds: 5,
            chromedriver_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Hard cap on a single recording, in seconds (default: 4 hours).
    pub max_duration_seconds: u64,
    /// Liveness probe interval while recording.
    pub probe_interval_seconds: u64,
    /// How long ffmpeg gets to exit after the graceful quit before being killed.
    pub stop_timeout_seconds: u64,
    /// Startup window in which ffmpeg must stay alive and produce output.
    pub start_grace_seconds: u64,
    /// Where artifacts land; defaults to the platform data dir.
    pub output_dir: Option<PathBuf>,
    /// Keep the local file even after a successful upload.
    pub keep_local_files: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: 14400,
            probe_interval_seconds: 30,
            stop_timeout_seconds: 10,
            start_grace_seconds: 2,
            output_dir: None,
            keep_local_files: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Optional Drive folder the artifact is filed under.
    pub folder_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5001 }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
            info!("Loaded config from {:?}", config_path);
            config
        } else {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            config
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Environment overrides, applied on top of the file. Unparseable values
    /// are ignored with a warning rather than failing startup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("MEETREC_MAX_RECORDING_DURATION") {
            match value.parse() {
                Ok(seconds) => self.recording.max_duration_seconds = seconds,
                Err(_) => warn!("Ignoring invalid MEETREC_MAX_RECORDING_DURATION: {value}"),
            }
        }
        if let Some(value) = lookup("MEETREC_PROBE_INTERVAL") {
            match value.parse() {
                Ok(seconds) => self.recording.probe_interval_seconds = seconds,
                Err(_) => warn!("Ignoring invalid MEETREC_PROBE_INTERVAL: {value}"),
            }
        }
        if let Some(value) = lookup("MEETREC_DRIVE_FOLDER_ID") {
            self.storage.folder_id = value;
        }
        if let Some(value) = lookup("MEETREC_PORT") {
            match value.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid MEETREC_PORT: {value}"),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
