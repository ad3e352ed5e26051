//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ShadercastResult;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Default export settings.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportDefaults {
    /// Default output width in pixels.
    pub width: u32,

    /// Default output height in pixels.
    pub height: u32,

    /// Default export duration in seconds.
    pub duration_secs: f64,

    /// Maximum number of frame buffers alive at once (pool capacity).
    pub max_buffers: usize,

    /// Flush the texture cache every this many frames.
    pub cache_flush_interval: u64,

    /// Fail the export if the encoder makes no demand for this long.
    /// `None` waits forever.
    pub demand_timeout_secs: Option<u64>,

    /// ffmpeg executable used by the file sink.
    pub ffmpeg_binary: String,

    /// ffmpeg video encoder name.
    pub video_codec: String,

    /// Frames the encoder may hold before it stops asking for more.
    pub encoder_queue_depth: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "shadercast_export=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            duration_secs: 10.0,
            max_buffers: 6,
            cache_flush_interval: 60,
            demand_timeout_secs: Some(30),
            ffmpeg_binary: "ffmpeg".to_string(),
            video_codec: "libx264".to_string(),
            encoder_queue_depth: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location, returning the path written.
    pub fn save(&self) -> ShadercastResult<PathBuf> {
        let path = config_file_path();
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, config_path: &Path) -> ShadercastResult<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, json)?;
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("shadercast").join("config.json")
}
