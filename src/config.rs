//! Player configuration
//!
//! Loaded from a TOML file; every field has a default so an empty or missing
//! file yields a working player that discovers its server.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub player: PlayerIdentity,
    pub stream: StreamConfig,
}

/// Control server location and connection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server address; discovered when absent and discovery is enabled
    pub address: Option<IpAddr>,
    pub port: u16,
    pub discovery: bool,
    pub discovery_attempts: u32,
    pub read_timeout_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: DEFAULT_SLIMPROTO_PORT,
            discovery: true,
            discovery_attempts: 5,
            read_timeout_secs: 10,
            reconnect_delay_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Output device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Host device name, `default`, or `null`
    pub device: String,
    /// Frames queued ahead of the hardware
    pub buffer_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            buffer_frames: DEFAULT_OUTPUT_BUFFER_FRAMES,
        }
    }
}

/// How the player introduces itself in `HELO`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerIdentity {
    /// Colon-separated MAC; the server keys per-player settings on it
    pub mac: String,
    pub uuid: Option<Uuid>,
    pub model: String,
    pub model_name: String,
    pub device_id: u8,
    pub revision: u8,
}

impl Default for PlayerIdentity {
    fn default() -> Self {
        Self {
            mac: "00:00:00:00:00:02".to_string(),
            uuid: None,
            model: "squeezeplay".to_string(),
            model_name: "SlimRs".to_string(),
            device_id: 12,
            revision: 255,
        }
    }
}

/// Streaming buffer sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Read-ahead buffer in bytes
    pub buffer_size: usize,
    /// Frames handed to the device per write
    pub chunk_frames: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }
}

impl AppConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "slimproto", "slim-pcm-player")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_mac(&self.player.mac)?;
        if self.stream.buffer_size == 0 {
            return Err(Error::Config("stream.buffer_size must be positive".into()));
        }
        if self.stream.chunk_frames == 0 {
            return Err(Error::Config("stream.chunk_frames must be positive".into()));
        }
        if self.audio.buffer_frames == 0 {
            return Err(Error::Config("audio.buffer_frames must be positive".into()));
        }
        Ok(())
    }
}

/// Parse a colon-separated MAC address
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return Err(Error::Config(format!("cannot parse MAC address {:?}", mac)));
    }

    let mut out = [0u8; 6];
    for (byte, part) in out.iter_mut().zip(parts) {
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| Error::Config(format!("cannot parse MAC address {:?}", mac)))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        assert_eq!(parse_mac("00:00:00:00:00:02").unwrap(), [0, 0, 0, 0, 0, 2]);
        assert_eq!(parse_mac("de:AD:be:ef:0:1").unwrap(), [0xde, 0xad, 0xbe, 0xef, 0, 1]);
        assert!(parse_mac("00:00:00:00:02").is_err());
        assert!(parse_mac("00:00:00:00:00:zz").is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            address = "192.168.1.10"
            discovery = false

            [audio]
            device = "hw:0,0"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.address, Some("192.168.1.10".parse().unwrap()));
        assert_eq!(config.server.port, 3483);
        assert!(!config.server.discovery);
        assert_eq!(config.audio.device, "hw:0,0");
        assert_eq!(config.player.model_name, "SlimRs");
        assert_eq!(config.stream.buffer_size, 1 << 20);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml("[player]\nmac = \"nonsense\"").is_err());
        assert!(AppConfig::from_toml("[stream]\nchunk_frames = 0").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let path = Path::new("/nonexistent/slim-pcm-player.toml");
        assert!(matches!(AppConfig::load(Some(path)), Err(Error::Config(_))));
    }
}
