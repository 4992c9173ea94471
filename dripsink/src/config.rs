//! Daemon configuration.
//!
//! One JSON5 file declares the broker endpoint, logging, and an array of
//! instances per source kind:
//!
//! ```json5
//! {
//!     mqtt: { hostname: "broker.lan", username: "sensors", password: "..." },
//!     sources: {
//!         aranet: [{
//!             name: "downstairs",
//!             hostname: "station.lan",
//!             username: "reader",
//!             password: "...",
//!             sensors: { "1": "kitchen", "2": "bedroom" },
//!         }],
//!         somneo: [{ name: "bedroom", hostname: "somneo.lan" }],
//!         system: [{ name: "local", interval_secs: 60 }],
//!         random: [{ name: "demo", metrics: { dice: [1, 6] } }],
//!     },
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dripsink_common::{LoggingConfig, MqttConfig};

use crate::source::Source;
use crate::sources::{AranetSource, RandomSource, SomneoSource, SystemSource};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker connection settings.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Source instances, grouped by kind.
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Source instances, one array per adapter kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub aranet: Vec<AranetConfig>,

    #[serde(default)]
    pub somneo: Vec<SomneoConfig>,

    #[serde(default)]
    pub random: Vec<RandomConfig>,

    #[serde(default)]
    pub system: Vec<SystemConfig>,
}

/// Aranet base-station instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AranetConfig {
    pub name: String,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    pub hostname: String,
    pub username: String,
    pub password: String,

    /// Sensor id to logical sensor name.
    pub sensors: BTreeMap<String, String>,

    /// Verify the station's TLS certificate (default: true).
    #[serde(default = "default_verify")]
    pub verify: bool,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Somneo lamp instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SomneoConfig {
    pub name: String,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    pub hostname: String,

    /// Verify the lamp's TLS certificate (default: true).
    #[serde(default = "default_verify")]
    pub verify: bool,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Synthetic source instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomConfig {
    pub name: String,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Metric name to inclusive `[low, high]` range.
    pub metrics: BTreeMap<String, (i64, i64)>,
}

/// Local system metrics instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Mount points to report disk usage for (default: `["/"]`).
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,
}

fn default_interval() -> u64 {
    300
}

fn default_verify() -> bool {
    true
}

fn default_timeout() -> u64 {
    5
}

fn default_paths() -> Vec<String> {
    vec!["/".to_string()]
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency the type system cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let mut names = BTreeSet::new();
        let mut check = |kind: &str, name: &str, interval: u64| {
            if interval == 0 {
                return Err(ConfigError::Validation(format!(
                    "{}:{}: poll interval must be positive",
                    kind, name
                )));
            }
            if !names.insert(format!("{}:{}", kind, name)) {
                return Err(ConfigError::Validation(format!(
                    "duplicate source name {}:{}",
                    kind, name
                )));
            }
            Ok(())
        };

        for source in &self.sources.aranet {
            check("aranet", &source.name, source.interval_secs)?;
            if source.sensors.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "aranet:{}: at least one sensor is required",
                    source.name
                )));
            }
        }
        for source in &self.sources.somneo {
            check("somneo", &source.name, source.interval_secs)?;
        }
        for source in &self.sources.random {
            check("random", &source.name, source.interval_secs)?;
            for (metric, (low, high)) in &source.metrics {
                if low > high {
                    return Err(ConfigError::Validation(format!(
                        "random:{}: empty range for metric '{}'",
                        source.name, metric
                    )));
                }
            }
        }
        for source in &self.sources.system {
            check("system", &source.name, source.interval_secs)?;
        }

        Ok(())
    }

    /// Construct every configured source instance with its poll interval, in
    /// registration order (kind by kind, file order within a kind).
    pub fn build_sources(&self) -> Vec<(Box<dyn Source>, Duration)> {
        let mut sources: Vec<(Box<dyn Source>, Duration)> = Vec::new();

        for config in &self.sources.aranet {
            sources.push((
                Box::new(AranetSource::new(
                    config.name.clone(),
                    &config.hostname,
                    config.username.clone(),
                    config.password.clone(),
                    config.sensors.clone(),
                    config.verify,
                    Duration::from_secs(config.timeout_secs),
                )),
                Duration::from_secs(config.interval_secs),
            ));
        }
        for config in &self.sources.somneo {
            sources.push((
                Box::new(SomneoSource::new(
                    config.name.clone(),
                    &config.hostname,
                    config.verify,
                    Duration::from_secs(config.timeout_secs),
                )),
                Duration::from_secs(config.interval_secs),
            ));
        }
        for config in &self.sources.random {
            sources.push((
                Box::new(RandomSource::new(config.name.clone(), config.metrics.clone())),
                Duration::from_secs(config.interval_secs),
            ));
        }
        for config in &self.sources.system {
            sources.push((
                Box::new(SystemSource::new(config.name.clone(), config.paths.clone())),
                Duration::from_secs(config.interval_secs),
            ));
        }

        sources
    }
}
