//! Canopy Operator Entry Point
//!
//! Starts the Cluster controller that projects leaf clusters as synthetic
//! nodes in the root cluster.

use std::sync::Arc;

use canopy_k8s::controller::{self, OperatorConfig, PassthroughTranslator};
use canopy_k8s::{telemetry, Error};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    telemetry::init();

    info!("Starting Canopy Operator v{}", env!("CARGO_PKG_VERSION"));

    // Initialize the root cluster client
    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;

    info!("Connected to root cluster");

    let config = OperatorConfig::from_env()?;
    let state = Arc::new(controller::ControllerState::new(
        client,
        config,
        Arc::new(PassthroughTranslator),
    ));

    // Run the main controller loop
    controller::run_controller(state).await?;

    Ok(())
}
