use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use kube_cost_connector::config::load_config;
use kube_cost_connector::kubernetes::KubeClusterApi;
use kube_cost_connector::metrics::{MetricsApi, MetricsServerClient, PrometheusClient, TimeSeriesApi, UsageSources};
use kube_cost_connector::orchestrator::{ClientBundle, Orchestrator, Scheduler};
use kube_cost_connector::sink::BillingSinkFactory;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = load_config()?;
    info!(
        connector = %cfg.name,
        cluster = %cfg.cluster.name,
        collectors = ?cfg.enabled_collectors,
        interval_secs = cfg.collector.collection_interval.as_secs(),
        "Starting cost connector"
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let time_series: Option<Arc<dyn TimeSeriesApi>> = match &cfg.usage.prometheus_url {
        Some(url) => Some(Arc::new(
            PrometheusClient::new(url, cfg.usage.query_timeout).context("Failed to create Prometheus client")?,
        )),
        None => None,
    };
    let metrics_api: Option<Arc<dyn MetricsApi>> = if cfg.usage.metrics_server {
        Some(Arc::new(MetricsServerClient::new(client.clone())))
    } else {
        None
    };
    if time_series.is_none() && metrics_api.is_none() {
        warn!("No usage source configured; pod and node usage will be reported as zero");
    }

    let clients = ClientBundle {
        cluster: Arc::new(KubeClusterApi::new(client)),
        usage: UsageSources::new(time_series, metrics_api),
    };
    let sink_factory = Arc::new(BillingSinkFactory::new(cfg.base_url.clone(), cfg.sink_timeout));
    let orchestrator = Arc::new(Orchestrator::new(cfg, clients, sink_factory));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = tokio::spawn(Scheduler::new(orchestrator.clone()).run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    scheduler.await.context("Collection loop panicked")?;

    let status = orchestrator.status().await;
    info!(
        collected = status.collected_count,
        events = status.event_count,
        last_error = ?status.last_error,
        "Connector stopped"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
