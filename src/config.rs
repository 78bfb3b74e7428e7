//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::w2st::protocol::AhrsVariant;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LinkConfig {
    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Radio/scan configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    /// How long a scan collects advertisements before candidates are picked
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,

    /// Upper bound on a single link-level connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Only peripherals whose advertised name starts with this prefix are
    /// considered; empty means "any peripheral advertising the W2ST service"
    #[serde(default)]
    pub name_prefix: String,
}

/// Control state configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Throttle idle value; 0 for the stock firmware, 1 for the variant
    #[serde(default = "default_throttle_idle")]
    pub throttle_idle: u8,
}

/// Telemetry decoding configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// AHRS third-triple meaning: "magnetometer" or "axis"
    #[serde(default = "default_ahrs_variant")]
    pub ahrs_variant: String,

    /// Per-stream retention for the stdout/stderr console buffers
    #[serde(default = "default_console_capacity_bytes")]
    pub console_capacity_bytes: usize,
}

// Default value functions
fn default_scan_timeout_ms() -> u64 { 5000 }
fn default_connect_timeout_ms() -> u64 { 10000 }

fn default_throttle_idle() -> u8 { 0 }

fn default_ahrs_variant() -> String { "magnetometer".to_string() }
fn default_console_capacity_bytes() -> usize { 4096 }

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            name_prefix: String::new(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            throttle_idle: default_throttle_idle(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            ahrs_variant: default_ahrs_variant(),
            console_capacity_bytes: default_console_capacity_bytes(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<LinkConfig>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use drone_link::config::LinkConfig;
    ///
    /// let config = LinkConfig::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: LinkConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.radio.scan_timeout_ms == 0 || self.radio.scan_timeout_ms > 60000 {
            return Err(crate::error::DroneLinkError::Config(
                toml::de::Error::custom("scan_timeout_ms must be between 1 and 60000"),
            ));
        }

        if self.radio.connect_timeout_ms == 0 || self.radio.connect_timeout_ms > 60000 {
            return Err(crate::error::DroneLinkError::Config(
                toml::de::Error::custom("connect_timeout_ms must be between 1 and 60000"),
            ));
        }

        if self.control.throttle_idle > 1 {
            return Err(crate::error::DroneLinkError::Config(
                toml::de::Error::custom("throttle_idle must be 0 or 1"),
            ));
        }

        if !matches!(self.telemetry.ahrs_variant.as_str(), "magnetometer" | "axis") {
            return Err(crate::error::DroneLinkError::Config(
                toml::de::Error::custom("ahrs_variant must be \"magnetometer\" or \"axis\""),
            ));
        }

        if self.telemetry.console_capacity_bytes == 0
            || self.telemetry.console_capacity_bytes > 1_048_576
        {
            return Err(crate::error::DroneLinkError::Config(
                toml::de::Error::custom("console_capacity_bytes must be between 1 and 1048576"),
            ));
        }

        Ok(())
    }

    /// Scan timeout as a [`Duration`]
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.radio.scan_timeout_ms)
    }

    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.radio.connect_timeout_ms)
    }

    /// Parsed AHRS firmware variant
    pub fn ahrs_variant(&self) -> AhrsVariant {
        match self.telemetry.ahrs_variant.as_str() {
            "axis" => AhrsVariant::Axis,
            _ => AhrsVariant::Magnetometer,
        }
    }
}
