//! Configuration management
//!
//! Priority: built-in defaults, then the TOML file, then environment
//! variables. The binary applies its own flags last.

mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

pub use file::{ConfigFile, config_file_path};

use crate::camera::CameraConstraints;
use crate::voice::RestartPolicy;
use crate::{Error, Result};

/// Default recognition service base URL
pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:5000";

/// Digit canvas configuration
#[derive(Debug, Default)]
pub struct Config {
    /// Recognition service
    pub service: ServiceConfig,
    /// Drawing surface
    pub surface: SurfaceConfig,
    /// Recognition timing
    pub recognition: RecognitionConfig,
    /// Camera
    pub camera: CameraConfig,
    /// Voice commands
    pub voice: VoiceConfig,
}

/// Recognition service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL; requests go to `{url}/predict`
    pub url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVICE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Drawing surface size
#[derive(Debug, Clone, Copy)]
pub struct SurfaceConfig {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 700,
            height: 400,
        }
    }
}

/// Recognition timing
#[derive(Debug, Clone, Copy)]
pub struct RecognitionConfig {
    /// Streaming cycle period while the camera is live
    pub stream_interval: Duration,
    /// Delay between a finished stroke and its recognition
    pub debounce: Duration,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            stream_interval: Duration::from_millis(400),
            debounce: crate::input::STROKE_DEBOUNCE,
        }
    }
}

/// Camera settings
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Frame source (image file or directory); `None` means no camera
    pub source: Option<PathBuf>,
    /// Requested width
    pub width: u32,
    /// Requested height
    pub height: u32,
    /// Time between frames
    pub frame_interval: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let constraints = CameraConstraints::default();
        Self {
            source: None,
            width: constraints.width,
            height: constraints.height,
            frame_interval: Duration::from_millis(100),
        }
    }
}

impl CameraConfig {
    /// Constraints to request from the device
    #[must_use]
    pub fn constraints(&self) -> CameraConstraints {
        CameraConstraints {
            width: self.width,
            height: self.height,
            ..CameraConstraints::default()
        }
    }
}

/// Voice command settings
#[derive(Debug)]
pub struct VoiceConfig {
    /// Recognition language (BCP 47)
    pub language: String,
    /// Transcription endpoint
    pub stt_url: String,
    /// Transcription model
    pub stt_model: String,
    /// Per-request transcription timeout
    pub stt_timeout: Duration,
    /// Transcription API key; voice is unavailable without one
    pub api_key: Option<SecretString>,
    /// Consecutive listener failures before voice turns off
    pub max_restart_failures: u32,
    /// First restart delay
    pub restart_base_delay: Duration,
    /// Restart delay cap
    pub restart_max_delay: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let policy = RestartPolicy::default();
        Self {
            language: "zh-TW".to_string(),
            stt_url: crate::voice::DEFAULT_STT_URL.to_string(),
            stt_model: "whisper-1".to_string(),
            stt_timeout: crate::voice::DEFAULT_STT_TIMEOUT,
            api_key: None,
            max_restart_failures: policy.max_consecutive_failures,
            restart_base_delay: policy.base_delay,
            restart_max_delay: policy.max_delay,
        }
    }
}

impl VoiceConfig {
    /// Listener restart policy
    #[must_use]
    pub const fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_consecutive_failures: self.max_restart_failures,
            base_delay: self.restart_base_delay,
            max_delay: self.restart_max_delay,
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// Reads `path` if given (a failure is an error), otherwise the standard
    /// config file if present, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file can't be loaded or the
    /// resulting configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => ConfigFile::read(path)?,
            None => ConfigFile::load_default(),
        };

        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from a config file
    pub fn apply_file(&mut self, file: ConfigFile) {
        let ConfigFile {
            service,
            surface,
            recognition,
            camera,
            voice,
        } = file;

        if let Some(url) = service.url {
            self.service.url = url;
        }
        if let Some(ms) = service.timeout_ms {
            self.service.timeout = Duration::from_millis(ms);
        }

        if let Some(width) = surface.width {
            self.surface.width = width;
        }
        if let Some(height) = surface.height {
            self.surface.height = height;
        }

        if let Some(ms) = recognition.stream_interval_ms {
            self.recognition.stream_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = recognition.debounce_ms {
            self.recognition.debounce = Duration::from_millis(ms);
        }

        if camera.source.is_some() {
            self.camera.source = camera.source;
        }
        if let Some(width) = camera.width {
            self.camera.width = width;
        }
        if let Some(height) = camera.height {
            self.camera.height = height;
        }
        if let Some(ms) = camera.frame_interval_ms {
            self.camera.frame_interval = Duration::from_millis(ms);
        }

        if let Some(language) = voice.language {
            self.voice.language = language;
        }
        if let Some(url) = voice.stt_url {
            self.voice.stt_url = url;
        }
        if let Some(model) = voice.stt_model {
            self.voice.stt_model = model;
        }
        if let Some(ms) = voice.stt_timeout_ms {
            self.voice.stt_timeout = Duration::from_millis(ms);
        }
        if let Some(key) = voice.api_key.filter(|k| !k.is_empty()) {
            self.voice.api_key = Some(SecretString::from(key));
        }
        if let Some(max) = voice.max_restart_failures {
            self.voice.max_restart_failures = max;
        }
        if let Some(ms) = voice.restart_base_delay_ms {
            self.voice.restart_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = voice.restart_max_delay_ms {
            self.voice.restart_max_delay = Duration::from_millis(ms);
        }
    }

    /// Overlay values from environment variables
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    /// Unparseable numbers are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let millis = |key: &str| {
            lookup(key).and_then(|v| match v.parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(e) => {
                    tracing::warn!(key, value = %v, error = %e, "ignoring invalid env value");
                    None
                }
            })
        };
        let pixels = |key: &str| {
            lookup(key).and_then(|v| match v.parse::<u32>() {
                Ok(px) => Some(px),
                Err(e) => {
                    tracing::warn!(key, value = %v, error = %e, "ignoring invalid env value");
                    None
                }
            })
        };

        if let Some(url) = lookup("DIGIT_CANVAS_URL") {
            self.service.url = url;
        }
        if let Some(timeout) = millis("DIGIT_CANVAS_TIMEOUT_MS") {
            self.service.timeout = timeout;
        }
        if let Some(width) = pixels("DIGIT_CANVAS_WIDTH") {
            self.surface.width = width;
        }
        if let Some(height) = pixels("DIGIT_CANVAS_HEIGHT") {
            self.surface.height = height;
        }
        if let Some(interval) = millis("DIGIT_CANVAS_STREAM_INTERVAL_MS") {
            self.recognition.stream_interval = interval;
        }
        if let Some(source) = lookup("DIGIT_CANVAS_CAMERA_SOURCE") {
            self.camera.source = Some(PathBuf::from(source));
        }
        if let Some(language) = lookup("DIGIT_CANVAS_VOICE_LANGUAGE") {
            self.voice.language = language;
        }
        if let Some(url) = lookup("DIGIT_CANVAS_STT_URL") {
            self.voice.stt_url = url;
        }
        if let Some(model) = lookup("DIGIT_CANVAS_STT_MODEL") {
            self.voice.stt_model = model;
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.voice.api_key = Some(SecretString::from(key));
        }
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns `Config` error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.service.url.trim().is_empty() {
            return Err(Error::Config("service url is empty".to_string()));
        }
        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(Error::Config(format!(
                "surface size {}x{} is empty",
                self.surface.width, self.surface.height
            )));
        }
        if self.recognition.stream_interval.is_zero() {
            return Err(Error::Config("stream interval must be positive".to_string()));
        }
        if self.service.timeout < self.recognition.stream_interval {
            return Err(Error::Config(format!(
                "request timeout {:?} is shorter than the stream interval {:?}",
                self.service.timeout, self.recognition.stream_interval
            )));
        }
        if self.camera.frame_interval.is_zero() {
            return Err(Error::Config("camera frame interval must be positive".to_string()));
        }
        if self.voice.stt_timeout.is_zero() {
            return Err(Error::Config("transcription timeout must be positive".to_string()));
        }
        if self.voice.max_restart_failures == 0 {
            return Err(Error::Config("max_restart_failures must be at least 1".to_string()));
        }
        Ok(())
    }
}
