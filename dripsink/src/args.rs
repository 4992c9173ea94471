//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "dripsink", version, about = "Sensor-to-MQTT publishing daemon")]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "dripsink.json5")]
    pub config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}
