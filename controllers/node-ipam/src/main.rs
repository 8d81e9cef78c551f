//! Node IPAM Controller
//!
//! Manages per-node IP address pools (`NodeIPPool`):
//! - Expands a pool from the node's pod CIDR before it runs out of free entries
//! - Reserves pool addresses for the owner workloads of annotated pods
//! - Recycles addresses whose owner workload no longer exists
//!
//! All pool writes are conditional on the observed resourceVersion.

mod address;
mod backoff;
mod cache;
mod config;
mod controller;
mod error;
mod queue;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Node IPAM Controller");

    // Load configuration from environment variables
    let config = ControllerConfig::from_env().inspect_err(|e| error!("{}", e))?;

    info!("Configuration:");
    info!("  Low watermark: {}", config.low_watermark);
    info!("  Expand step: {}", config.expand_step);
    info!("  Bind mode: {}", config.bind_mode);
    info!("  IPAM annotation: {}", config.ipam_annotation);
    info!(
        "  Label selector: {}",
        config
            .label_selector
            .as_ref()
            .map_or_else(|| "<all pods>".to_string(), ToString::to_string)
    );
    info!("  Recycle grace: {:?}", config.recycle_grace);

    // Initialize and run controller
    let controller = Controller::new(config).await.inspect_err(|e| error!("Startup failed: {}", e))?;
    controller.run().await?;

    Ok(())
}
