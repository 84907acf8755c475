//! TFACC probe
//!
//! Maps the accelerator, performs the server-info handshake and reports what
//! the firmware says about itself. Useful to check a device node and mapping
//! offset before running a model on it.

use anyhow::{Context, Result};
use tfacc_client::{TfaccClient, TfaccConfig};
use tfacc_common::METRICS;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Load configuration
    let config = match std::env::var("TFACC_CONFIG") {
        Ok(path) => TfaccConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        Err(_) => TfaccConfig::from_env().context("loading configuration from the environment")?,
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tfacc_client={}", config.log_level()).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting TFACC probe");

    let client = TfaccClient::connect(&config).with_context(|| {
        format!(
            "connecting to {} at offset {:#x}",
            config.device.path.display(),
            config.device.map_offset
        )
    })?;

    let partitions = client.partition_count();
    if let Some(server_info) = client.server_info() {
        info!("Compute partitions: {}", partitions);
        for (key, value) in &server_info.extra {
            info!("  {}: {}", key, value);
        }
    }

    client.shutdown().context("releasing resident tensors")?;

    if config.metrics_enabled() {
        println!("{}", METRICS.gather());
    }

    info!("TFACC probe finished");
    Ok(())
}
