//! Layered configuration for `pulsegen`.
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults
//! 2. `pulsegen.yaml` (or the file given with `--config`)
//! 3. Environment variables (`PULSEGEN_*`)
//! 4. Command-line flags

use std::env;
use std::path::{Path, PathBuf};

use pulse_core::controller::OutputConfig;
use pulse_core::timing::{DEFAULT_CLOCK_DIVISOR, T7_CORE_CLOCK_HZ};
use pulse_core::waveform::{DEFAULT_OVERSAMPLE, OutputLevels};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "pulsegen.yaml";

/// Modbus TCP port used when the device address has none.
pub const MODBUS_TCP_PORT: u16 = 502;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Where the T7 lives on the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    /// `host` or `host:port`
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Per-request response timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Output wiring and clocking, mirrored into [`OutputConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_core_clock_hz")]
    pub core_clock_hz: u32,

    #[serde(default = "default_clock_divisor")]
    pub clock_divisor: u32,

    #[serde(default)]
    pub clock_source: u8,

    #[serde(default)]
    pub output_dio: u8,

    /// `null` disables counter read-back.
    #[serde(default = "default_counter_dio")]
    pub counter_dio: Option<u8>,

    #[serde(default = "default_on_volts")]
    pub on_volts: f64,

    #[serde(default)]
    pub off_volts: f64,

    #[serde(default = "default_oversample")]
    pub oversample: u32,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            core_clock_hz: default_core_clock_hz(),
            clock_divisor: default_clock_divisor(),
            clock_source: 0,
            output_dio: 0,
            counter_dio: default_counter_dio(),
            on_volts: default_on_volts(),
            off_volts: 0.0,
            oversample: default_oversample(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub device: Option<String>,
    pub log_level: Option<String>,
}

impl Config {
    /// Loads defaults, then the YAML file, then the environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or an
    /// environment override is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Parses one YAML file; missing sections and fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file deserializes to unit, not to an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Applies `PULSEGEN_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Environment`] for a value that does not parse.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("PULSEGEN_DEVICE") {
            self.device.address = value;
        }
        if let Some(value) = lookup("PULSEGEN_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = lookup("PULSEGEN_CLOCK_DIVISOR") {
            self.output.clock_divisor =
                value
                    .trim()
                    .parse()
                    .map_err(|error: std::num::ParseIntError| ConfigError::Environment {
                        name: "PULSEGEN_CLOCK_DIVISOR",
                        value: value.clone(),
                        reason: error.to_string(),
                    })?;
        }
        Ok(())
    }

    pub fn apply_flags(&mut self, flags: &FlagOverrides) {
        if let Some(device) = &flags.device {
            self.device.address.clone_from(device);
        }
        if let Some(level) = &flags.log_level {
            self.logging.level.clone_from(level);
        }
    }

    #[must_use]
    pub fn output_config(&self) -> OutputConfig {
        let output = &self.output;
        OutputConfig {
            core_clock_hz: output.core_clock_hz,
            clock_divisor: output.clock_divisor,
            clock_source: output.clock_source,
            output_dio: output.output_dio,
            counter_dio: output.counter_dio,
            levels: OutputLevels::new(output.on_volts, output.off_volts),
            oversample: output.oversample,
        }
    }

    /// Device address with the default Modbus port filled in.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DeviceAddress`] for an empty host or bad port.
    pub fn socket_address(&self) -> Result<String, ConfigError> {
        let address = self.device.address.trim();
        let invalid = || ConfigError::DeviceAddress(self.device.address.clone());

        match address.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() || !matches!(port.parse::<u16>(), Ok(port) if port != 0) {
                    return Err(invalid());
                }
                Ok(address.to_owned())
            }
            None if address.is_empty() => Err(invalid()),
            None => Ok(format!("{address}:{MODBUS_TCP_PORT}")),
        }
    }

    /// Checks the output section against the device and the device address.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.output_config().validate()?;
        self.socket_address()?;
        Ok(())
    }

    /// Renders the effective configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Render`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(ConfigError::Render)
    }

    /// Path shown in logs for where the configuration came from.
    #[must_use]
    pub fn source_path(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                fallback.exists().then(|| fallback.to_path_buf())
            }
        }
    }
}

fn default_address() -> String {
    "192.168.1.207".into()
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1_000
}

fn default_core_clock_hz() -> u32 {
    T7_CORE_CLOCK_HZ
}

fn default_clock_divisor() -> u32 {
    DEFAULT_CLOCK_DIVISOR
}

#[allow(clippy::unnecessary_wraps)]
fn default_counter_dio() -> Option<u8> {
    Some(18)
}

fn default_on_volts() -> f64 {
    5.0
}

fn default_oversample() -> u32 {
    DEFAULT_OVERSAMPLE
}

fn default_log_level() -> String {
    "info".into()
}
