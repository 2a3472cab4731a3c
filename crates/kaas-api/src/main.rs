//! KaaS - deploy apps and databases onto Kubernetes over a small HTTP API

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use kaas_api::{start_server, AppState};
use kaas_common::config::{
    KubeConfigMapSource, DEFAULT_DATABASE_CONFIG_MAP, DEFAULT_PLATFORM_CONFIG_MAP,
};
use kaas_common::kube_utils::create_client;
use kaas_common::telemetry::{init_telemetry, TelemetryConfig};
use kaas_common::{ConfigSources, PlatformConfig, DEFAULT_CONFIG_NAMESPACE, DEFAULT_LISTEN_ADDR};
use kaas_engine::{Engine, KubeOrchestrator};

/// KaaS - Kubernetes as a Service API server
#[derive(Parser, Debug)]
#[command(name = "kaas", version, about, long_about = None)]
struct Cli {
    /// Address to serve the HTTP API on
    #[arg(long, env = "KAAS_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Path to a kubeconfig; in-cluster config or ~/.kube/config when unset
    #[arg(long, env = "KAAS_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Namespace holding the startup ConfigMaps
    #[arg(long, env = "KAAS_CONFIG_NAMESPACE", default_value = DEFAULT_CONFIG_NAMESPACE)]
    config_namespace: String,

    /// Name of the platform ConfigMap
    #[arg(long, env = "KAAS_PLATFORM_CONFIG", default_value = DEFAULT_PLATFORM_CONFIG_MAP)]
    platform_config: String,

    /// Name of the database defaults ConfigMap
    #[arg(long, env = "KAAS_DATABASE_CONFIG", default_value = DEFAULT_DATABASE_CONFIG_MAP)]
    database_config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry =
        init_telemetry(TelemetryConfig::default()).context("failed to initialize telemetry")?;

    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .context("failed to create kubernetes client")?;

    let sources = ConfigSources {
        namespace: cli.config_namespace,
        platform_map: cli.platform_config,
        database_map: cli.database_config,
    };
    let config = PlatformConfig::load(&KubeConfigMapSource::new(client.clone()), &sources)
        .await
        .context("failed to load platform configuration")?;

    info!(
        namespace = %config.namespace,
        ingress = %config.ingress_name,
        "managing namespace"
    );

    let orchestrator = KubeOrchestrator::new(client, config.namespace.clone());
    let engine = Engine::new(Arc::new(orchestrator), config);

    let served = start_server(cli.listen, AppState::new(engine)).await;
    telemetry.shutdown();
    served?;
    Ok(())
}
