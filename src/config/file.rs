//! TOML configuration file
//!
//! Every field is optional; the file is a partial overlay on the defaults.
//! Durations are written in milliseconds.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level config file schema
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Recognition service
    pub service: ServiceFileConfig,
    /// Drawing surface
    pub surface: SurfaceFileConfig,
    /// Recognition timing
    pub recognition: RecognitionFileConfig,
    /// Camera
    pub camera: CameraFileConfig,
    /// Voice commands
    pub voice: VoiceFileConfig,
}

/// `[service]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceFileConfig {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// `[surface]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceFileConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// `[recognition]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecognitionFileConfig {
    pub stream_interval_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
}

/// `[camera]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraFileConfig {
    /// Image file or directory of frames to replay as the camera feed
    pub source: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_interval_ms: Option<u64>,
}

/// `[voice]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoiceFileConfig {
    /// BCP 47 language tag (e.g. "zh-TW")
    pub language: Option<String>,
    pub stt_url: Option<String>,
    pub stt_model: Option<String>,
    pub stt_timeout_ms: Option<u64>,
    pub api_key: Option<String>,
    pub max_restart_failures: Option<u32>,
    pub restart_base_delay_ms: Option<u64>,
    pub restart_max_delay_ms: Option<u64>,
}

impl ConfigFile {
    /// Parse a config file
    ///
    /// # Errors
    ///
    /// Returns error if the file can't be read or isn't valid config TOML
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(file)
    }

    /// Load the file at the standard path, if there is one
    ///
    /// A missing file is not an error; an unreadable one is logged and
    /// ignored.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = config_file_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        Self::read(&path).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            Self::default()
        })
    }
}

/// Standard config file path, e.g. `~/.config/digit-canvas/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "digit-canvas")
        .map(|d| d.config_dir().join("config.toml"))
}
