//! Device configuration file support

use crate::audio::{HwParams, PcmHardware};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Device configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device name used in logs
    pub name: String,

    /// Sample rate in Hz (44100 or 48000)
    pub rate: u32,

    /// Stream buffer size in frames
    pub buffer_frames: usize,

    /// Period size in frames
    pub period_frames: usize,

    /// Loopback ring capacity in bytes
    pub ring_bytes: usize,

    /// Route playback into capture (false = capture yields silence)
    pub loopback: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = log to stderr)
    #[serde(default)]
    pub log_file: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "softpcm".to_string(),
            rate: 48000,
            buffer_frames: 19200,
            period_frames: 480,
            ring_bytes: 512 * 1024,
            loopback: true,
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl DeviceConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: softpcm.toml
    /// 2. User config directory: softpcm/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        for path in Self::default_paths() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                paths.push(exe_dir.join("softpcm.toml"));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("softpcm").join("config.toml"));
        }

        paths
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Stream geometry described by this configuration
    pub fn hw_params(&self) -> HwParams {
        HwParams::new(self.rate, self.buffer_frames, self.period_frames)
    }

    /// Check the ring size and geometry before creating a device
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_bytes == 0 {
            return Err(ConfigError::Invalid("ring_bytes must be non-zero".to_string()));
        }
        PcmHardware::default()
            .validate(&self.hw_params())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# softpcm device configuration

# Device name shown in logs
name = "softpcm"

# Sample rate in Hz: 44100 or 48000 (default: 48000)
rate = 48000

# Stream buffer in frames; 4 bytes per frame, 64 KiB..512 KiB (default: 19200)
buffer_frames = 19200

# Period in frames; 1 KiB..64 KiB, 2..1024 periods per buffer (default: 480)
period_frames = 480

# Loopback ring capacity in bytes (default: 524288)
ring_bytes = 524288

# Loop playback into capture; false makes capture return silence
loopback = true

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = log to stderr)
log_file = ""
"#
        .to_string()
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file
    Io {
        path: String,
        source: std::io::Error,
    },
    /// Error parsing TOML
    Parse {
        path: String,
        source: toml::de::Error,
    },
    /// Error serializing config
    Serialize(toml::ser::Error),
    /// Values outside what the device supports
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path, source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config file '{}': {}", path, source)
            }
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Serialize(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}
