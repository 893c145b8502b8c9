//! Executor server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use opr_executor_application::maintenance::Maintenance;
use opr_executor_application::Adapters;
use opr_executor_infrastructure::kube;
use opr_executor_infrastructure::kube::lease::LeaseManager;
use opr_executor_infrastructure::kube::pod_fs::PodFs;
use opr_executor_infrastructure::kube::state::RuntimeStateAccessor;
use opr_executor_infrastructure::kube::workloads::Workloads;
use opr_executor_infrastructure::storage::s3::S3ArtifactStore;
use opr_executor_server::state::AppState;
use opr_executor_shared::config::ConfigLoader;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let env_file = std::path::PathBuf::from(".env");
    let loader = ConfigLoader::new(env_file.exists().then_some(env_file));
    let config = loader.load().context("failed to load configuration")?;

    info!("Executor v{}", env!("CARGO_PKG_VERSION"));
    info!(
        namespace = %config.kubernetes.namespace,
        bucket = %config.storage.bucket,
        "configuration loaded"
    );

    let client = kube::init_client()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let namespace = config.kubernetes.namespace.clone();

    let adapters = Adapters {
        workloads: Workloads::new(client.clone(), &namespace),
        state: RuntimeStateAccessor::new(client.clone(), &namespace),
        pod_fs: PodFs::new(client.clone(), &namespace),
        artifacts: Arc::new(S3ArtifactStore::new(&config.storage)),
        http: reqwest::Client::new(),
        config: config.clone(),
    };

    // One reaper per replica; the lease keeps only one of them active.
    let lease_identity = format!("{}-{}", config.server.hostname, std::process::id());
    let maintenance = Arc::new(Maintenance::new(
        adapters.workloads.clone(),
        LeaseManager::new(client, &namespace, lease_identity),
        config.maintenance.interval,
        config.maintenance.inactive_threshold,
    ));
    let maintenance_handle = maintenance.clone().start();

    let state = AppState::new(adapters);
    let router = opr_executor_server::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the reaper and give it a bounded window to wind down.
    maintenance.stop();
    if let Some(handle) = maintenance_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    info!("executor stopped");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
