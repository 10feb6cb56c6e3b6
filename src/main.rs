//! Volume group operator - groups CSI volumes behind declarative VolumeGroups

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tonic::transport::Endpoint;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volume_group_operator::config::DriverConfig;
use volume_group_operator::controller::{self, Context};
use volume_group_operator::crd::{VolumeGroup, VolumeGroupContent};
use volume_group_operator::driver::CsiVolumeGroupClient;
use volume_group_operator::events::KubeEventPublisher;

/// Volume group operator - CRD-driven controller for CSI volume groups
#[derive(Parser, Debug)]
#[command(name = "volume-group-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Name of the CSI driver this controller instance owns
    #[arg(long, env = "DRIVER_NAME", default_value = "")]
    driver_name: String,

    /// Endpoint of the CSI driver's volume group service
    #[arg(long, env = "CSI_ENDPOINT", default_value = "http://127.0.0.1:10000")]
    csi_endpoint: String,

    /// Deadline for each driver RPC, in seconds
    #[arg(long, default_value = "120")]
    rpc_timeout_secs: u64,

    /// Allow a claim to belong to more than one volume group
    #[arg(long, env = "MULTIPLE_VGS_TO_PVC")]
    multiple_vgs_to_pvc: bool,

    /// Prefix for backend volume group names
    #[arg(long, default_value = "volumegroup")]
    volume_group_name_prefix: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for the kinds this controller owns
        let crds = [
            serde_yaml::to_string(&VolumeGroup::crd())
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?,
            serde_yaml::to_string(&VolumeGroupContent::crd())
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?,
        ];
        println!("{}", crds.join("---\n"));
        return Ok(());
    }

    if cli.driver_name.is_empty() {
        anyhow::bail!("--driver-name is required");
    }

    let config = DriverConfig {
        driver_name: cli.driver_name.clone(),
        rpc_timeout: Duration::from_secs(cli.rpc_timeout_secs),
        multiple_vgs_to_pvc: cli.multiple_vgs_to_pvc,
        volume_group_name_prefix: cli.volume_group_name_prefix.clone(),
    };

    tracing::info!(
        driver = %config.driver_name,
        endpoint = %cli.csi_endpoint,
        "volume group operator starting"
    );

    // Connect to the CSI driver's volume group service
    let channel = Endpoint::from_shared(cli.csi_endpoint.clone())
        .map_err(|e| anyhow::anyhow!("Invalid CSI endpoint: {}", e))?
        .connect_timeout(Duration::from_secs(10))
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to CSI driver: {}", e))?;
    let driver = Arc::new(CsiVolumeGroupClient::new(channel, config.rpc_timeout));

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Hold the reconcilers back until the CRDs are served
    controller::wait_for_crds(&client)
        .await
        .map_err(|e| anyhow::anyhow!("Failed while waiting for CRDs: {}", e))?;

    let events = Arc::new(KubeEventPublisher::new(
        client.clone(),
        "volume-group-operator",
    ));
    let ctx = Arc::new(Context::new(client.clone(), driver, events, config));

    controller::run(client, ctx).await;

    tracing::info!("volume group operator shutting down");
    Ok(())
}
