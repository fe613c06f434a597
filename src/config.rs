//! Service configuration.
//!
//! Configuration is read from an optional TOML file; every section and
//! field has a default so an empty file (or no file) yields a working
//! demo setup. Command-line flags override file values in `main`.

use crate::controls::PresetDefinition;
use crate::source::CameraCommand;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Which frame source to open at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceSelection {
    /// Probe for the HQ Camera, fall back to the synthetic source.
    #[default]
    Auto,
    /// Require the HQ Camera.
    Hardware,
    /// Always use the synthetic star field.
    Synthetic,
}

/// Camera and frame source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub source: SourceSelection,
    /// Vendor tool names for the hardware source.
    pub command: CameraCommand,
    pub preview_size: Resolution,
    /// HQ Camera full resolution by default.
    pub still_size: Resolution,
    pub video_size: Resolution,
    /// Live view frame rate.
    pub preview_fps: u32,
    /// JPEG quality (1-100) for preview and synthetic frames.
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: SourceSelection::Auto,
            command: CameraCommand::default(),
            preview_size: Resolution::new(1280, 720),
            still_size: Resolution::new(4056, 3040),
            video_size: Resolution::new(1920, 1080),
            preview_fps: 25,
            jpeg_quality: 80,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    /// Resolves the listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))
    }
}

/// Where captures and session state live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub captures_dir: PathBuf,
    /// Last-known control values, restored at startup when set.
    pub state_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            captures_dir: PathBuf::from("/var/lib/astrocam/captures"),
            state_file: None,
        }
    }
}

/// Live view fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Frames buffered per viewer before a slow viewer starts skipping.
    pub channel_capacity: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4,
        }
    }
}

/// Video encoder backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// Concatenated JPEG frames written in-process (`.mjpeg`).
    #[default]
    Mjpeg,
    /// H.264 in MP4 through an `ffmpeg` child process.
    Ffmpeg,
}

/// Video recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub encoder: EncoderKind,
    /// Target bitrate for the ffmpeg encoder in bits per second.
    pub bitrate: u32,
    pub ffmpeg_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderKind::Mjpeg,
            bitrate: 10_000_000,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub video: VideoConfig,
    /// Extra presets, validated against the control registry at startup.
    #[serde(default)]
    pub presets: Vec<PresetDefinition>,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {0} resolution")]
    InvalidResolution(&'static str),
    #[error("invalid JPEG quality (must be 1-100)")]
    InvalidJpegQuality,
    #[error("invalid preview frame rate (must be 1-60 fps)")]
    InvalidFrameRate,
    #[error("invalid preview channel capacity")]
    InvalidCapacity,
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("invalid preset: {0}")]
    InvalidPreset(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let camera = &self.camera;
        for (name, size) in [
            ("preview", camera.preview_size),
            ("still", camera.still_size),
            ("video", camera.video_size),
        ] {
            if size.width == 0 || size.height == 0 {
                return Err(ConfigError::InvalidResolution(name));
            }
        }
        if camera.jpeg_quality == 0 || camera.jpeg_quality > 100 {
            return Err(ConfigError::InvalidJpegQuality);
        }
        if camera.preview_fps == 0 || camera.preview_fps > 60 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.preview.channel_capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        self.server.socket_addr()?;
        Ok(())
    }
}
