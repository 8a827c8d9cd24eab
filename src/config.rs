//! Application configuration
//!
//! Loaded from a TOML file. Every section and field has a default, so a
//! missing file or a partial one is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::discovery::{default_service_name, SERVICE_TYPE};
use crate::error::ConfigError;
use crate::volume::history::{DEFAULT_EXPONENT, DEFAULT_FLOOR};

const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    pub audio: AudioConfig,
    pub child: ChildConfig,
    pub parent: ParentConfig,
    pub volume: VolumeConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            audio: AudioConfig::default(),
            child: ChildConfig::default(),
            parent: ParentConfig::default(),
            volume: VolumeConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Stream format and device selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per captured frame
    pub frame_samples: usize,
    /// Capture device name; default device when unset
    pub input_device: Option<String>,
    /// Playback device name; default device when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: constants::SAMPLE_RATE,
            frame_samples: constants::DEFAULT_FRAME_SAMPLES,
            input_device: None,
            output_device: None,
        }
    }
}

/// Child device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildConfig {
    /// First port tried; later attempts count upwards from here
    pub port: u16,
    pub bind_address: String,
    /// Advertised instance name; derived from the host name when unset
    pub service_name: Option<String>,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            service_name: None,
        }
    }
}

impl ChildConfig {
    pub fn service_name(&self) -> String {
        self.service_name.clone().unwrap_or_else(default_service_name)
    }
}

/// Parent device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Receive buffer size, in multiples of the frame size in bytes
    pub read_buffer_frames: usize,
    /// Refresh period of the volume meter
    pub render_interval_ms: u64,
    pub meter_width: usize,
}

impl Default for ParentConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: constants::CONNECT_TIMEOUT.as_millis() as u64,
            read_timeout_ms: constants::READ_TIMEOUT.as_millis() as u64,
            read_buffer_frames: 2,
            render_interval_ms: 100,
            meter_width: 60,
        }
    }
}

impl ParentConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` (wait forever) when configured as 0
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(1))
    }
}

/// Volume history parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub capacity: usize,
    /// Perceptual exponent; 2.0 is mean square
    pub exponent: f64,
    /// Initial peak before any audio arrives
    pub floor: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            capacity: constants::HISTORY_CAPACITY,
            exponent: DEFAULT_EXPONENT,
            floor: DEFAULT_FLOOR,
        }
    }
}

/// Service directory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Use multicast DNS; otherwise only manual connection works
    pub mdns: bool,
    pub service_type: String,
    /// How long `listen` waits for the first child
    pub browse_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mdns: true,
            service_type: SERVICE_TYPE.to_string(),
            browse_timeout_ms: 10_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn browse_timeout(&self) -> Duration {
        Duration::from_millis(self.browse_timeout_ms)
    }
}

impl AppConfig {
    /// Per-user config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("org", "childmonitor", "child-monitor")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`, or the default location when `None`
    ///
    /// A file that does not exist yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let config = match fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!("Loading config from {}", path.display());
                toml::from_str::<AppConfig>(&text)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                AppConfig::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let write = || -> io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, text)
        };
        write().map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.child.port == 0 {
            return invalid("child.port", "must be between 1 and 65535");
        }
        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate", "must be positive");
        }
        if self.audio.frame_samples == 0 {
            return invalid("audio.frame_samples", "must be positive");
        }
        if self.parent.read_buffer_frames == 0 {
            return invalid("parent.read_buffer_frames", "must be positive");
        }
        if self.volume.capacity == 0 {
            return invalid("volume.capacity", "must be positive");
        }
        if !(self.volume.exponent > 0.0) {
            return invalid("volume.exponent", "must be positive");
        }
        if !(self.volume.floor > 0.0) {
            return invalid("volume.floor", "must be positive");
        }
        Ok(())
    }

    /// Receive buffer size in bytes; one µ-law byte per sample
    pub fn read_buffer_bytes(&self) -> usize {
        self.audio.frame_samples * self.parent.read_buffer_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.child.port, 10000);
        assert_eq!(config.volume.capacity, 16384);
        assert_eq!(config.read_buffer_bytes(), 2 * config.audio.frame_samples);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.child.port = 12000;
        config.child.service_name = Some("Nursery".to_string());
        config.volume.exponent = 1.5;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.child.service_name(), "Nursery");
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[child]\nport = 11000\n\n[discovery]\nmdns = false\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.child.port, 11000);
        assert!(!config.discovery.mdns);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        fs::write(&path, "[child]\nport = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Invalid { field: "child.port", .. })
        ));

        fs::write(&path, "[volume]\nexponent = -1.0\n").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Invalid { field: "volume.exponent", .. })
        ));

        fs::write(&path, "[audio]\nframe_samples = \"many\"\n").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(ConfigError::Parse(_))));
    }
}
