//! Relay, detector and sender configuration
//!
//! Each process builds its config once at startup (YAML file, then the
//! deployment's environment keys on top) and hands it to its sessions.
//! Nothing below the binaries reads process state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::servers::relay::attack::{AttackMode, AttackParams};

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn out_of_range(field: &'static str, reason: String) -> ConfigError {
    ConfigError::OutOfRange { field, reason }
}

/// Seconds must be finite, non-negative and representable as a [`Duration`].
fn check_secs(field: &'static str, secs: f64) -> Result<(), ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map(|_| ())
        .map_err(|e| out_of_range(field, format!("{} is not a valid duration: {}", secs, e)))
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse YAML in {}", path.display()))
}

// ============================================
// Relay
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_any_host")]
    pub listen_host: String,

    #[serde(default = "default_relay_port")]
    pub listen_port: u16,

    /// Where the real receiver lives.
    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_detector_port")]
    pub server_port: u16,

    /// Kept as text so an unknown mode degrades to transparent instead of
    /// failing the whole config.
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Seconds.
    #[serde(default = "default_delay_min")]
    pub delay_min: f64,

    /// Seconds.
    #[serde(default = "default_delay_max")]
    pub delay_max: f64,

    #[serde(default = "default_drop_rate")]
    pub drop_rate: f64,

    #[serde(default = "default_reorder_window")]
    pub reorder_window: usize,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

// ============================================
// Detector
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_any_host")]
    pub listen_host: String,

    #[serde(default = "default_detector_port")]
    pub listen_port: u16,

    /// Seconds a message may spend in flight before it is flagged.
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_true")]
    pub detection_enabled: bool,
}

// ============================================
// Sender
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// The relay, or the detector directly when no relay is in the path.
    #[serde(default = "default_sender_host")]
    pub host: String,

    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Seconds between messages.
    #[serde(default = "default_message_interval")]
    pub message_interval: f64,

    #[serde(default = "default_payload")]
    pub payload: String,

    /// Stop after this many messages; run until interrupted when unset.
    #[serde(default)]
    pub max_messages: Option<u64>,
}

// ============================================
// Default value functions
// Defaults match the stock docker deployment
// ============================================

fn default_any_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_host() -> String {
    "server".to_string()
}

fn default_sender_host() -> String {
    "proxy".to_string()
}

fn default_relay_port() -> u16 {
    9000
}

fn default_detector_port() -> u16 {
    9001
}

fn default_mode() -> String {
    "transparent".to_string()
}

fn default_delay_min() -> f64 {
    2.0
}

fn default_delay_max() -> f64 {
    10.0
}

fn default_drop_rate() -> f64 {
    0.3
}

fn default_reorder_window() -> usize {
    5
}

fn default_buffer_size() -> usize {
    4096
}

fn default_max_delay() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_message_interval() -> f64 {
    10.0
}

fn default_payload() -> String {
    "Username=ROOT=, Password=SSHTERMINAL".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_host: default_any_host(),
            listen_port: default_relay_port(),
            server_host: default_server_host(),
            server_port: default_detector_port(),
            mode: default_mode(),
            delay_min: default_delay_min(),
            delay_max: default_delay_max(),
            drop_rate: default_drop_rate(),
            reorder_window: default_reorder_window(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            listen_host: default_any_host(),
            listen_port: default_detector_port(),
            max_delay: default_max_delay(),
            buffer_size: default_buffer_size(),
            detection_enabled: default_true(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: default_sender_host(),
            port: default_relay_port(),
            message_interval: default_message_interval(),
            payload: default_payload(),
            max_messages: None,
        }
    }
}

impl RelayConfig {
    /// Load and validate a YAML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `PROXY_*` keys from the deployment environment.
    ///
    /// Unrelated keys are ignored. Call [`RelayConfig::validate`] afterwards.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "PROXY_LISTEN_HOST" => self.listen_host = value.to_string(),
                "PROXY_LISTEN_PORT" => self.listen_port = parse_env(key, value)?,
                "PROXY_SERVER_HOST" => self.server_host = value.to_string(),
                "PROXY_SERVER_PORT" => self.server_port = parse_env(key, value)?,
                "PROXY_MODE" => self.mode = value.to_string(),
                "PROXY_DELAY_MIN" => self.delay_min = parse_env(key, value)?,
                "PROXY_DELAY_MAX" => self.delay_max = parse_env(key, value)?,
                "PROXY_DROP_RATE" => self.drop_rate = parse_env(key, value)?,
                "PROXY_REORDER_WINDOW" => self.reorder_window = parse_env(key, value)?,
                "PROXY_BUFFER_SIZE" => self.buffer_size = parse_env(key, value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_secs("delay_min", self.delay_min)?;
        check_secs("delay_max", self.delay_max)?;
        if self.delay_max < self.delay_min {
            return Err(out_of_range(
                "delay_max",
                format!("{} is below delay_min {}", self.delay_max, self.delay_min),
            ));
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(out_of_range(
                "drop_rate",
                format!("{} is outside [0, 1]", self.drop_rate),
            ));
        }
        if self.reorder_window == 0 {
            return Err(out_of_range("reorder_window", "must be at least 1".to_string()));
        }
        if self.buffer_size == 0 {
            return Err(out_of_range("buffer_size", "must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Resolve the configured mode, falling back to transparent.
    pub fn attack_mode(&self) -> AttackMode {
        AttackMode::parse_or_default(&self.mode)
    }

    pub fn attack_params(&self) -> AttackParams {
        AttackParams {
            delay_min: self.delay_min,
            delay_max: self.delay_max,
            drop_rate: self.drop_rate,
            reorder_window: self.reorder_window,
        }
    }
}

impl DetectorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `SERVER_*` keys from the deployment environment.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "SERVER_LISTEN_HOST" => self.listen_host = value.to_string(),
                "SERVER_LISTEN_PORT" => self.listen_port = parse_env(key, value)?,
                "SERVER_MAX_DELAY" => self.max_delay = parse_env(key, value)?,
                "SERVER_BUFFER_SIZE" => self.buffer_size = parse_env(key, value)?,
                // Anything but "true" switches detection off.
                "SERVER_DETECTION_ENABLED" => {
                    self.detection_enabled = value.trim().eq_ignore_ascii_case("true")
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_delay.is_finite() && self.max_delay >= 0.0) {
            return Err(out_of_range("max_delay", format!("{} is negative", self.max_delay)));
        }
        if self.buffer_size == 0 {
            return Err(out_of_range("buffer_size", "must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl SenderConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `CLIENT_*` keys from the deployment environment.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "CLIENT_PROXY_HOST" => self.host = value.to_string(),
                "CLIENT_PROXY_PORT" => self.port = parse_env(key, value)?,
                "CLIENT_MESSAGE_INTERVAL" => self.message_interval = parse_env(key, value)?,
                "CLIENT_MESSAGE_PAYLOAD" => self.payload = value.trim().to_string(),
                "CLIENT_MAX_MESSAGES" => self.max_messages = Some(parse_env(key, value)?),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_secs("message_interval", self.message_interval)?;
        if self.payload.contains('|') || self.payload.contains('\n') {
            return Err(out_of_range(
                "payload",
                "must not contain '|' or a newline".to_string(),
            ));
        }
        Ok(())
    }
}
