//! Configuration for the sender and receiver halves of the pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration. The same file serves both subcommands; each reads
/// its own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sender: SenderConfig,

    #[serde(default)]
    pub receiver: ReceiverConfig,
}

/// Capture-and-transmit side (runs on the camera host).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Receiver address: a direct IP or a hostname to resolve (e.g. a
    /// tunneled endpoint).
    #[serde(default)]
    pub host: String,

    /// Receiver TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum bytes moved per capture read / socket write.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Seconds to wait between reconnect attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    #[serde(default)]
    pub camera: CameraConfig,
}

/// External MJPEG capture process, passed through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Capture command producing raw MJPEG on stdout.
    #[serde(default = "default_camera_command")]
    pub command: String,

    /// Full argument override. When unset, libcamera-vid style arguments are
    /// built from the resolution and framerate below.
    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Frame width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,

    /// Frames per second.
    #[serde(default = "default_fps")]
    pub fps: u32,
}

/// Receive-and-fan-out side (runs on the viewing host).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Listen address for the inbound stream.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Listen TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum bytes per socket read.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Accumulation buffer cap; exceeding it with no complete frame drops
    /// the connection.
    #[serde(default = "default_max_buffer")]
    pub max_buffer_bytes: usize,

    /// HTTP re-broadcast port (independent of the stream port).
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Milliseconds between frames on the HTTP multipart stream.
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,

    /// JPEG quality for re-encoded output (1-100).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Directory for recordings and snapshots.
    #[serde(default = "default_record_dir")]
    pub record_dir: PathBuf,

    /// Recording sample rate, fixed when a recording is opened.
    #[serde(default = "default_record_fps")]
    pub record_fps: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            chunk_size: default_chunk_size(),
            reconnect_delay_secs: default_reconnect_delay(),
            camera: CameraConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: default_camera_command(),
            args: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            chunk_size: default_chunk_size(),
            max_buffer_bytes: default_max_buffer(),
            http_port: default_http_port(),
            frame_interval_ms: default_frame_interval(),
            jpeg_quality: default_jpeg_quality(),
            record_dir: default_record_dir(),
            record_fps: default_record_fps(),
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    5001
}
fn default_chunk_size() -> usize {
    4096
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_camera_command() -> String {
    "libcamera-vid".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    30
}
fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_max_buffer() -> usize {
    8 * 1024 * 1024
}
fn default_http_port() -> u16 {
    8080
}
fn default_frame_interval() -> u64 {
    50
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_record_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_record_fps() -> u32 {
    20
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sender;
        if s.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "sender: chunk_size must be > 0".to_string(),
            ));
        }
        if s.camera.width == 0 || s.camera.height == 0 {
            return Err(ConfigError::Invalid(
                "sender: camera width and height must be > 0".to_string(),
            ));
        }
        if s.camera.fps == 0 || s.camera.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "sender: camera fps must be between 1 and 120, got {}",
                s.camera.fps
            )));
        }

        let r = &self.receiver;
        if r.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "receiver: chunk_size must be > 0".to_string(),
            ));
        }
        if r.max_buffer_bytes < r.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "receiver: max_buffer_bytes ({}) must be at least chunk_size ({})",
                r.max_buffer_bytes, r.chunk_size
            )));
        }
        if r.jpeg_quality == 0 || r.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "receiver: jpeg_quality must be between 1 and 100, got {}",
                r.jpeg_quality
            )));
        }
        if r.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "receiver: frame_interval_ms must be > 0".to_string(),
            ));
        }
        if r.record_fps == 0 || r.record_fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "receiver: record_fps must be between 1 and 120, got {}",
                r.record_fps
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.receiver.port, 5001);
        assert_eq!(config.receiver.chunk_size, 4096);
        assert_eq!(config.sender.reconnect_delay_secs, 5);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
[sender]
host = "203.0.113.9"
port = 6000
chunk_size = 8192

[sender.camera]
width = 1280
height = 720
fps = 25

[receiver]
listen_addr = "127.0.0.1"
port = 6000
http_port = 9090
frame_interval_ms = 100
record_fps = 15
        "#;

        let config = Config::from_str(toml).unwrap();

        assert_eq!(config.sender.host, "203.0.113.9");
        assert_eq!(config.sender.port, 6000);
        assert_eq!(config.sender.chunk_size, 8192);
        assert_eq!(config.sender.camera.width, 1280);
        assert_eq!(config.sender.camera.fps, 25);

        assert_eq!(config.receiver.listen_addr, "127.0.0.1");
        assert_eq!(config.receiver.http_port, 9090);
        assert_eq!(config.receiver.frame_interval_ms, 100);
        assert_eq!(config.receiver.record_fps, 15);
        // Unset fields fall back to defaults.
        assert_eq!(config.receiver.max_buffer_bytes, 8 * 1024 * 1024);
        assert_eq!(config.receiver.jpeg_quality, 80);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.receiver.port, 5001);
        assert_eq!(config.sender.camera.command, "libcamera-vid");
    }

    #[test]
    fn invalid_chunk_size_rejected() {
        let result = Config::from_str("[receiver]\nchunk_size = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn buffer_cap_smaller_than_chunk_rejected() {
        let result = Config::from_str("[receiver]\nmax_buffer_bytes = 1024\n");
        assert!(result.is_err());
    }

    #[test]
    fn invalid_quality_rejected() {
        let result = Config::from_str("[receiver]\njpeg_quality = 101\n");
        assert!(result.is_err());
    }

    #[test]
    fn roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = Config::from_str(&toml_str).unwrap();

        assert_eq!(config.receiver.port, parsed.receiver.port);
        assert_eq!(config.sender.camera.width, parsed.sender.camera.width);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.sender.host = "203.0.113.9".to_string();
        config.receiver.port = 6000;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.sender.host, "203.0.113.9");
        assert_eq!(loaded.receiver.port, 6000);
    }
}
