// crates/core/src/config.rs
//! Application configuration.
//!
//! Resolution order: built-in defaults, then `config.toml` (from
//! `$REELGRAB_CONFIG` or the platform config dir), then environment
//! variables. The binary applies CLI flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;
use crate::tool::ToolSettings;

pub const CONFIG_ENV: &str = "REELGRAB_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Conversion tool executable, resolved on `PATH` when not a path.
    pub tool_path: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    /// Passed to the tool only when the file exists.
    pub cookies_path: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub max_concurrency: usize,
    pub metadata_timeout_secs: u64,
    pub playlist_timeout_secs: u64,
    /// Hard limit for one conversion. Unset means no limit.
    pub conversion_timeout_secs: Option<u64>,
    pub artifact_max_age_secs: u64,
    pub sweep_interval_secs: u64,
    pub min_free_bytes: u64,
    pub max_batch_items: usize,
    pub static_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            tool_path: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            cookies_path: paths::cookies_file(),
            scratch_dir: paths::scratch_dir(),
            max_concurrency: 3,
            metadata_timeout_secs: 30,
            playlist_timeout_secs: 60,
            conversion_timeout_secs: None,
            artifact_max_age_secs: 3600,
            sweep_interval_secs: 900,
            min_free_bytes: 512 * 1024 * 1024,
            max_batch_items: 50,
            static_dir: None,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with the config file (if any) and the process
    /// environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(paths::config_file);

        let mut config = match path {
            Some(path) if path.is_file() => Self::from_file(&path)?,
            Some(path) if explicit.is_some() => {
                return Err(ConfigError::Read {
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                    path,
                });
            }
            _ => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply `REELGRAB_PORT`/`PORT`, `YTDLP_PATH`, `FFMPEG_PATH`,
    /// `REELGRAB_SCRATCH_DIR` and `STATIC_DIR`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        for var in ["REELGRAB_PORT", "PORT"] {
            if let Some(value) = non_empty(var) {
                self.port = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Env { var, value: value.clone() })?;
                break;
            }
        }
        if let Some(value) = non_empty("YTDLP_PATH") {
            self.tool_path = PathBuf::from(value);
        }
        if let Some(value) = non_empty("FFMPEG_PATH") {
            self.ffmpeg_location = Some(PathBuf::from(value));
        }
        if let Some(value) = non_empty("REELGRAB_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(value);
        }
        if let Some(value) = non_empty("STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            tool_path: self.tool_path.clone(),
            ffmpeg_location: self.ffmpeg_location.clone(),
            cookies_path: self.cookies_path.clone(),
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn playlist_timeout(&self) -> Duration {
        Duration::from_secs(self.playlist_timeout_secs)
    }

    pub fn conversion_timeout(&self) -> Option<Duration> {
        self.conversion_timeout_secs.map(Duration::from_secs)
    }

    pub fn artifact_max_age(&self) -> Duration {
        Duration::from_secs(self.artifact_max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
