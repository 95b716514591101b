//! Configuration management for gameview
//!
//! Provides configuration loading, saving and validation for the capture
//! device, the listening socket and the per-transport session settings.

use crate::errors::CameraError;
use crate::types::{CameraFormat, PixelFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `GAMEVIEW__SERVER__PORT=8080`.
pub const ENV_PREFIX: &str = "GAMEVIEW";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameviewConfig {
    pub camera: CameraConfig,
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub webrtc: WebRtcConfig,
    pub gamepad: GamepadConfig,
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device node to capture from
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Encoded output requested from the device (mjpeg or h264)
    pub format: PixelFormat,
    pub fps: u32,
    /// Number of driver buffers to map
    pub buffers: u32,
}

/// Listening socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

/// WebSocket streaming sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum frames per second sent to each viewer
    pub target_fps: u32,
    /// Frames buffered per viewer before the oldest is dropped
    pub subscriber_buffer: usize,
}

/// Peer-connection sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN/TURN URLs offered to the ICE agent; empty means host candidates only
    pub ice_servers: Vec<String>,
    /// Gather 127.0.0.1 candidates too, for viewers on the same host
    pub include_loopback_candidates: bool,
    /// Upper bound on candidate gathering before the offer request fails
    pub gather_timeout_ms: u64,
    pub subscriber_buffer: usize,
}

/// HID control passthrough
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GamepadConfig {
    pub enabled: bool,
    pub device: PathBuf,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            width: 1280,
            height: 720,
            format: PixelFormat::Mjpeg,
            fps: 30,
            buffers: 4,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            subscriber_buffer: 4,
        }
    }
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            include_loopback_candidates: false,
            gather_timeout_ms: 5000,
            subscriber_buffer: 8,
        }
    }
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: PathBuf::from("/dev/hidg0"),
        }
    }
}

impl CameraConfig {
    pub fn capture_format(&self) -> CameraFormat {
        CameraFormat::new(self.width, self.height, self.fps, self.format)
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl WebRtcConfig {
    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }
}

impl GameviewConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: GameviewConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the TOML file if present, then `GAMEVIEW__*`
    /// environment variables, each layer overriding the previous one.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| CameraError::ConfigError(format!("Failed to build defaults: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CameraError::ConfigError(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| CameraError::ConfigError(format!("Invalid configuration: {}", e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::ConfigError(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("gameview.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err("Invalid camera resolution".to_string());
        }
        if self.camera.fps == 0 || self.camera.fps > 240 {
            return Err("Invalid camera FPS (must be 1-240)".to_string());
        }
        if self.camera.buffers == 0 {
            return Err("Camera buffer count must be at least 1".to_string());
        }

        if self.server.port == 0 {
            return Err("Server port must be non-zero".to_string());
        }

        if self.stream.target_fps == 0 || self.stream.target_fps > 240 {
            return Err("Invalid stream target FPS (must be 1-240)".to_string());
        }
        if self.stream.subscriber_buffer == 0 || self.webrtc.subscriber_buffer == 0 {
            return Err("Subscriber buffers must hold at least one frame".to_string());
        }

        if self.webrtc.gather_timeout_ms == 0 {
            return Err("ICE gathering timeout must be non-zero".to_string());
        }

        Ok(())
    }
}
