//! Configuration structures for the motion controller.
//!
//! Supports TOML deserialization with sensible defaults for the
//! observed three-stepper rig and explicit values for other topologies.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Period of the cyclic process-data exchange.
    #[serde(with = "humantime_serde")]
    pub cycle_time: Duration,

    /// Period of the mode sequencer loop (coarser than the bus cycle).
    #[serde(with = "humantime_serde")]
    pub sequencer_period: Duration,

    /// Fieldbus configuration.
    pub bus: BusConfig,

    /// Motion targets written during `SET_POSITION`.
    pub motion: MotionTargets,

    /// Real-time scheduling configuration.
    pub realtime: RealtimeConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_micros(100),
            sequencer_period: Duration::from_millis(500),
            bus: BusConfig::default(),
            motion: MotionTargets::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

/// Byte offsets of one stepper device's regions inside the process image.
///
/// The output region carries commands to the device, the input region
/// carries status back. Offsets are configuration data, not discovered;
/// a new device on the bus means adding another pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOffsets {
    /// Base of the controller-to-device region.
    pub output: usize,
    /// Base of the device-to-controller region.
    pub input: usize,
}

/// Fieldbus bring-up and topology configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Network interface name (e.g. "eth0", "enp3s0").
    /// Must be explicitly configured for hardware operation.
    pub interface: Option<String>,

    /// Expected total slave count after configuration. Zero disables the
    /// count check (any non-zero discovery is accepted).
    pub expected_slaves: usize,

    /// Base timeout for a slave state-transition check. The SAFE_OP wait
    /// uses three times this value.
    #[serde(with = "humantime_serde")]
    pub state_timeout: Duration,

    /// Enable distributed-clock synchronization during bring-up.
    /// Failure to configure DC is logged and non-fatal.
    pub dc_enabled: bool,

    /// Output/input region offsets, one pair per stepper device.
    pub devices: Vec<DeviceOffsets>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: None,
            expected_slaves: 0,
            state_timeout: Duration::from_secs(2),
            dc_enabled: false,
            // Observed rig: three WAGO stepper terminals.
            devices: vec![
                DeviceOffsets {
                    output: 0x0005,
                    input: 0x0030,
                },
                DeviceOffsets {
                    output: 0x0011,
                    input: 0x003c,
                },
                DeviceOffsets {
                    output: 0x001d,
                    input: 0x0048,
                },
            ],
        }
    }
}

/// Targets applied to every device when the sequencer reaches
/// `SET_POSITION`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTargets {
    /// Absolute target position (24-bit payload, max 0x00FF_FFFF).
    pub move_target: u32,

    /// Velocity limit written before the move.
    pub velocity_limit: u16,

    /// Acceleration limit written before the move.
    pub acceleration_limit: u16,

    /// Device whose on-target bit decides arrival for the whole group.
    pub reference_device: usize,
}

impl Default for MotionTargets {
    fn default() -> Self {
        Self {
            move_target: 1000,
            velocity_limit: 5000,
            acceleration_limit: 5000,
            reference_device: 0,
        }
    }
}

/// Real-time scheduling configuration.
///
/// Priorities follow the observed deployment: the control thread runs
/// below the bus thread, and both stay under 49 so the kernel's socket
/// handling is not starved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable SCHED_FIFO scheduling (requires privileges).
    pub enabled: bool,

    /// Priority of the main/sequencer thread.
    pub priority: u8,

    /// Priority of the cyclic bus thread.
    pub bus_priority: u8,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            priority: 30,
            bus_priority: 40,
            lock_memory: true,
        }
    }
}

impl MotionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
