use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MQTT broker connection settings shared by the daemon and its tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname (default: "localhost").
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Broker port (default: 1883).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client and topic-root name (default: "dripsink").
    #[serde(default = "default_name")]
    pub name: String,

    /// Optional broker username.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional broker password. Requires a username.
    #[serde(default)]
    pub password: Option<String>,

    /// MQTT keepalive in seconds (default: 60).
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Backoff between connection attempts in seconds (default: 5).
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_name() -> String {
    "dripsink".to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_reconnect_interval() -> u64 {
    5
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            name: default_name(),
            username: None,
            password: None,
            keepalive_secs: default_keepalive(),
            reconnect_interval_secs: default_reconnect_interval(),
        }
    }
}

impl MqttConfig {
    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::Config(
                "A password cannot be specified without a username".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(Error::Config("The sink name cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Load a configuration from a JSON5 string.
pub fn parse_config<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
}
