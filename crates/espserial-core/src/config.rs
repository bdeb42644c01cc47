//! Interface configuration
//!
//! Loaded from JSON (typically `serial.json` next to the application) or
//! built in code. Durations are stored in milliseconds.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    CALLER_TIMEOUT_MARGIN_MS, DEFAULT_BAUD_RATE, DEFAULT_COOLDOWN_TICKS,
    DEFAULT_COOLDOWN_TICK_MS, DEFAULT_READ_TIMEOUT_MS, DEFAULT_RESPONSE_TIMEOUT_MS,
    MAX_LINE_LENGTH, MAX_SEND_ATTEMPTS,
};

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// JSON was malformed
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values the engine cannot run with
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for one serial interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Candidate ports, tried in order. Empty means auto-detect.
    pub ports: Vec<String>,

    /// Baud rate
    pub baud_rate: u32,

    /// Per-read timeout on the port in milliseconds
    pub read_timeout_ms: u64,

    /// Default per-attempt response timeout in milliseconds
    pub response_timeout_ms: u64,

    /// Added to the response timeout for the default caller-side wait
    pub caller_timeout_margin_ms: u64,

    /// Send attempts per request
    pub max_attempts: u32,

    /// Ticks to wait between connection attempts
    pub cooldown_ticks: u32,

    /// Length of one cooldown tick in milliseconds
    pub cooldown_tick_ms: u64,

    /// Partial lines are handed to the decoder once this long
    pub max_line_length: usize,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            caller_timeout_margin_ms: CALLER_TIMEOUT_MARGIN_MS,
            max_attempts: MAX_SEND_ATTEMPTS,
            cooldown_ticks: DEFAULT_COOLDOWN_TICKS,
            cooldown_tick_ms: DEFAULT_COOLDOWN_TICK_MS,
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl InterfaceConfig {
    /// Default settings with the given candidate ports
    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ports: ports.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Override the reconnection cooldown
    pub fn with_cooldown(mut self, ticks: u32, tick: Duration) -> Self {
        self.cooldown_ticks = ticks;
        self.cooldown_tick_ms = tick.as_millis() as u64;
        self
    }

    /// Parse and validate JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: InterfaceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be non-zero".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "read_timeout_ms must be non-zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.cooldown_ticks == 0 || self.cooldown_tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "cooldown must be at least one non-zero tick".into(),
            ));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid(
                "max_line_length must be non-zero".into(),
            ));
        }
        if self.ports.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid("port names must not be empty".into()));
        }
        Ok(())
    }

    /// Default per-attempt response timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Margin added for the default caller-side wait
    pub fn caller_timeout_margin(&self) -> Duration {
        Duration::from_millis(self.caller_timeout_margin_ms)
    }
}
