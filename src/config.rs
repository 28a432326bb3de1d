//! Session configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/session.toml` by default)
//! 2. environment variables prefixed with `DETECTOR_SESSION_`, nested keys split
//!    on a double underscore (`DETECTOR_SESSION_SESSION__WATCHDOG_TIMEOUT_MS=8000`)
//!
//! # Example
//! ```no_run
//! use detector_session::config::SessionConfig;
//!
//! let config = SessionConfig::load()?;
//! println!("Device: {}", config.device.name);
//! # Ok::<(), detector_session::error::SessionError>(())
//! ```

use crate::error::{AppResult, SessionError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/session.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DETECTOR_SESSION_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device identity, address and module layout
    #[serde(default)]
    pub device: DeviceConfig,
    /// Session timing and dedup policy
    #[serde(default)]
    pub session: SessionTiming,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Detector identity and module layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Device model name as reported to the operator
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Host name or IP address of the control unit
    #[serde(default = "default_address")]
    pub address: String,
    /// WebSocket port of the control unit
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    /// WebSocket path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Position (profile) module present
    #[serde(default = "default_true")]
    pub has_pos: bool,
    /// Range module present
    #[serde(default)]
    pub has_rng: bool,
    /// Integral module present
    #[serde(default = "default_true")]
    pub has_int: bool,
    /// High-voltage module present
    #[serde(default = "default_true")]
    pub has_hv: bool,
    /// Channel geometry used to validate calibration files
    #[serde(default)]
    pub channels: ChannelGeometry,
}

/// Number of channels per measurement module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelGeometry {
    /// Position channels along X
    #[serde(default = "default_profile_channels")]
    pub x: usize,
    /// Position channels along Y
    #[serde(default = "default_profile_channels")]
    pub y: usize,
    /// Range channels
    #[serde(default = "default_range_channels")]
    pub z: usize,
    /// Integral channels
    #[serde(default = "default_int_channels")]
    pub int: usize,
}

/// Session timing and error-dedup policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTiming {
    /// Time without a `watchdog` keepalive before the link is declared lost
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_ms: u64,
    /// Grace period before reporting that the first connection is not open
    #[serde(default = "default_handshake_grace")]
    pub handshake_grace_ms: u64,
    /// Identical device errors within this window are collapsed into one
    #[serde(default = "default_dedup_window")]
    pub error_dedup_window_secs: u64,
    /// Delay between reconnection attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Capacity of the session command mailbox
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

// Default value functions
fn default_app_name() -> String {
    "Detector Session".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_device_name() -> String {
    "detector".to_string()
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_ws_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_profile_channels() -> usize {
    64
}

fn default_range_channels() -> usize {
    128
}

fn default_int_channels() -> usize {
    2
}

fn default_watchdog_timeout() -> u64 {
    6000
}

fn default_handshake_grace() -> u64 {
    1100
}

fn default_dedup_window() -> u64 {
    8
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_command_capacity() -> usize {
    32
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            address: default_address(),
            ws_port: default_ws_port(),
            ws_path: default_ws_path(),
            has_pos: true,
            has_rng: false,
            has_int: true,
            has_hv: true,
            channels: ChannelGeometry::default(),
        }
    }
}

impl Default for ChannelGeometry {
    fn default() -> Self {
        Self {
            x: default_profile_channels(),
            y: default_profile_channels(),
            z: default_range_channels(),
            int: default_int_channels(),
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            watchdog_timeout_ms: default_watchdog_timeout(),
            handshake_grace_ms: default_handshake_grace(),
            error_dedup_window_secs: default_dedup_window(),
            reconnect_delay_ms: default_reconnect_delay(),
            command_capacity: default_command_capacity(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            device: DeviceConfig::default(),
            session: SessionTiming::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Missing keys fall back to defaults; a missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(SessionConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SessionError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(SessionError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.device.address.trim().is_empty() {
            return Err(SessionError::Configuration(
                "device.address must not be empty".to_string(),
            ));
        }

        if !(self.device.has_pos || self.device.has_rng || self.device.has_int) {
            return Err(SessionError::Configuration(
                "At least one measurement module (pos, rng, int) must be enabled".to_string(),
            ));
        }

        let timing = &self.session;
        if timing.watchdog_timeout_ms == 0 {
            return Err(SessionError::Configuration(
                "session.watchdog_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if timing.command_capacity == 0 {
            return Err(SessionError::Configuration(
                "session.command_capacity must be greater than zero".to_string(),
            ));
        }

        // Building the URL here surfaces bad host/path values before connecting.
        self.device.ws_url()?;
        Ok(())
    }
}

impl DeviceConfig {
    /// WebSocket URL of the control unit.
    pub fn ws_url(&self) -> AppResult<Url> {
        let path = if self.ws_path.starts_with('/') {
            self.ws_path.clone()
        } else {
            format!("/{}", self.ws_path)
        };
        let url = Url::parse(&format!("ws://{}:{}{}", self.address, self.ws_port, path))?;
        Ok(url)
    }

    /// Whether both position and range modules are fitted, which exposes the
    /// per-module enable switches.
    pub fn has_module_switches(&self) -> bool {
        self.has_pos && self.has_rng
    }
}

impl SessionTiming {
    /// Watchdog timeout as a [`Duration`].
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    /// Handshake grace period as a [`Duration`].
    pub fn handshake_grace(&self) -> Duration {
        Duration::from_millis(self.handshake_grace_ms)
    }

    /// Error dedup window as a [`Duration`].
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.error_dedup_window_secs)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.watchdog_timeout_ms, 6000);
        assert_eq!(config.session.handshake_grace_ms, 1100);
        assert_eq!(config.session.error_dedup_window_secs, 8);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = SessionConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_watchdog_rejected() {
        let mut config = SessionConfig::default();
        config.session.watchdog_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_modules_rejected() {
        let mut config = SessionConfig::default();
        config.device.has_pos = false;
        config.device.has_rng = false;
        config.device.has_int = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ws_url() {
        let mut device = DeviceConfig::default();
        device.address = "192.168.1.20".to_string();
        device.ws_port = 9000;
        device.ws_path = "daq".to_string();
        let url = device.ws_url().unwrap();
        assert_eq!(url.as_str(), "ws://192.168.1.20:9000/daq");
    }

    #[test]
    fn test_module_switches_need_pos_and_rng() {
        let mut device = DeviceConfig::default();
        assert!(!device.has_module_switches());
        device.has_rng = true;
        assert!(device.has_module_switches());
    }
}
