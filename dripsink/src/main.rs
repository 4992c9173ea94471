//! Daemon entry point: load the configuration, assemble the sink, run it
//! until a termination signal or a fatal broker error.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use dripsink::args::Args;
use dripsink::bus::MqttBus;
use dripsink::config::Config;
use dripsink::sink::Sink;
use dripsink_common::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config).with_context(|| {
        format!(
            "Failed to load configuration from '{}'",
            args.config.display()
        )
    })?;

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    init_tracing(&logging).context("Failed to initialize tracing")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting dripsink");

    let bus = MqttBus::new(config.mqtt.clone());
    let mut sink = Sink::new(config.mqtt.clone(), Box::new(bus));
    for (source, interval) in config.build_sources() {
        sink.register(source, interval);
    }
    if sink.source_count() == 0 {
        tracing::warn!("No sources configured; only the heartbeat will be published");
    }

    // Ctrl+C (and a supervisor's SIGINT) requests a graceful shutdown.
    let stop = sink.stop_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    sink.start().await?;

    tracing::info!("Goodbye!");
    Ok(())
}
