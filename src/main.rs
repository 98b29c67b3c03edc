use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use serin::client::KubeObjectClient;
use serin::config::Config;
use serin::controller::clock::SystemClock;
use serin::controller::config_tracker::KubeConfigTracker;
use serin::controller::store::KubeReleaseStore;
use serin::controller::target::DeploymentSource;
use serin::controller::{error_policy, reconcile, Context, StatusStore, StatusUpdater};
use serin::crd::release::Release;
use serin::observer::{ObserverFactory, PrometheusClient};
use serin::router::RouterFactory;
use serin::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        mesh_provider = %config.mesh_provider,
        metrics_server = %config.metrics_server,
        namespace = config.namespace.as_deref().unwrap_or("*"),
        "Starting serin canary controller"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();
    let metrics = create_metrics()?;

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_handle = tokio::spawn(async move {
        if let Err(e) =
            run_health_server(health_port, health_readiness, health_metrics, shutdown_signal).await
        {
            warn!(error = %e, "Health server failed");
        }
    });

    let objects = Arc::new(KubeObjectClient::new(client.clone()));
    let status = StatusStore::new(
        Arc::new(KubeReleaseStore::new(client.clone())),
        Arc::new(SystemClock),
    )
    .with_metrics(metrics.clone());
    let updater = StatusUpdater::new(
        status,
        Arc::new(DeploymentSource::new(objects.clone())),
        Arc::new(KubeConfigTracker::new(objects.clone())),
    );
    let prometheus = PrometheusClient::new(&config.metrics_server, config.metrics_timeout)?;
    let ctx = Arc::new(
        Context::new(
            updater,
            RouterFactory::new(objects, config.ingress_annotations_prefix.clone()),
            ObserverFactory::new(Arc::new(prometheus)),
            config.mesh_provider.clone(),
            config.requeue,
        )
        .with_selector_label(config.selector_label.clone())
        .with_metrics(metrics),
    );

    let releases: Api<Release> = match config.namespace.as_deref() {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    readiness.set_ready();
    info!("Controller ready, watching releases");

    // error_policy logs failures; only successes are logged here
    let controller = Controller::new(releases, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((release, _)) = res {
                info!(release = %release.name, namespace = ?release.namespace, "Reconciled");
            }
        });

    tokio::select! {
        _ = controller => {
            info!("Controller stream ended");
        }
        signal = wait_for_signal() => {
            match signal {
                Ok(name) => info!(signal = name, "Initiating graceful shutdown"),
                Err(e) => error!(error = %e, "Failed to listen for termination signals, shutting down"),
            }
            readiness.set_not_ready();
        }
    }

    shutdown_controller.shutdown();
    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    info!("serin controller shut down");
    Ok(())
}
