//! The collection cycle and the timer that drives it.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, OnceCell, RwLock};
use tracing::{debug, error, info, warn};

use crate::cluster::ContextProvider;
use crate::collector::{build_collectors, CollectorKind};
use crate::config::{clamp_interval, CollectorConfig, ConnectorConfig};
use crate::cost::{CostModel, CostRates};
use crate::error::{Error, Result};
use crate::kubernetes::ClusterApi;
use crate::metrics::UsageSources;
use crate::sink::{MetricsSink, RemoteClusterConfig, SinkFactory};
use crate::types::ResourceMetrics;

/// Clients built once at start-up and shared by every cycle.
#[derive(Clone)]
pub struct ClientBundle {
    pub cluster: Arc<dyn ClusterApi>,
    pub usage: UsageSources,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CyclePhase {
    #[default]
    Idle,
    Initializing,
    ContextResolving,
    Collecting,
    Dispatching,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorStatus {
    pub phase: CyclePhase,
    pub last_collection_time: Option<DateTime<Utc>>,
    pub collected_count: usize,
    pub event_count: usize,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

/// Effective settings for one cycle: local configuration with any remote
/// overrides applied on top.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub collector: CollectorConfig,
    pub kinds: Vec<CollectorKind>,
    pub rates: CostRates,
}

impl CycleSettings {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            collector: config.collector.clone(),
            kinds: config.enabled_collectors.clone(),
            rates: config.cost.clone(),
        }
    }

    pub fn apply_remote(&mut self, remote: &RemoteClusterConfig) {
        if let Some(interval) = remote.collection_interval.as_ref().and_then(|i| i.to_duration()) {
            self.collector.collection_interval = clamp_interval(interval);
        }
        if let Some(include) = &remote.include_namespaces {
            self.collector.include_namespaces = include.clone();
        }
        if let Some(exclude) = &remote.exclude_namespaces {
            self.collector.exclude_namespaces = exclude.clone();
        }
        if let Some(types) = &remote.resource_types {
            let mut kinds = Vec::new();
            for name in types {
                match CollectorKind::from_name(name) {
                    Some(kind) => kinds.push(kind),
                    None => warn!(resource_type = %name, "Ignoring unknown remote resource type"),
                }
            }
            if !kinds.is_empty() {
                self.kinds = kinds;
            }
        }
        if let Some(costing) = &remote.costing_configuration {
            if !costing.currency.trim().is_empty() {
                self.rates.currency = costing.currency.trim().to_string();
            }
            let overrides = [
                (costing.cpu_cost_per_core, &mut self.rates.cpu_per_core_hour),
                (costing.memory_cost_per_gb, &mut self.rates.memory_per_gb_hour),
                (costing.storage_cost_per_gb, &mut self.rates.storage_default_per_gb_hour),
            ];
            for (value, slot) in overrides {
                if value.is_finite() && value > 0.0 {
                    *slot = value;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub collected: usize,
    pub events: usize,
    /// Non-fatal failures: collectors that could not list their kind and
    /// rejected dispatches.
    pub errors: Vec<String>,
    pub next_interval: Duration,
    pub duration: Duration,
}

pub struct Orchestrator {
    config: ConnectorConfig,
    clients: ClientBundle,
    context: ContextProvider,
    sink_factory: Arc<dyn SinkFactory>,
    sink: OnceCell<Arc<dyn MetricsSink>>,
    status: RwLock<ConnectorStatus>,
}

impl Orchestrator {
    pub fn new(config: ConnectorConfig, clients: ClientBundle, sink_factory: Arc<dyn SinkFactory>) -> Self {
        let context = ContextProvider::new(config.cluster.clone());
        Self {
            config,
            clients,
            context,
            sink_factory,
            sink: OnceCell::new(),
            status: RwLock::new(ConnectorStatus::default()),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub async fn status(&self) -> ConnectorStatus {
        self.status.read().await.clone()
    }

    async fn set_phase(&self, phase: CyclePhase) {
        self.status.write().await.phase = phase;
        debug!(connector = %self.config.name, ?phase, "Cycle phase");
    }

    /// Creates the sink on first use. A failure leaves the cell empty so the
    /// next cycle retries.
    async fn sink(&self) -> Result<Arc<dyn MetricsSink>> {
        self.sink
            .get_or_try_init(|| async {
                let secret = &self.config.api_key;
                let raw = self
                    .clients
                    .cluster
                    .get_secret(&secret.namespace, &secret.name, &secret.key)
                    .await?;
                let key = String::from_utf8(raw).map_err(|_| {
                    Error::Config(format!(
                        "key {} in secret {}/{} is not valid UTF-8",
                        secret.key, secret.namespace, secret.name
                    ))
                })?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(Error::Config(format!(
                        "key {} in secret {}/{} is empty",
                        secret.key, secret.namespace, secret.name
                    )));
                }
                info!(connector = %self.config.name, base_url = %self.config.base_url, "Initialized billing sink");
                self.sink_factory.create(key.to_string()).await
            })
            .await
            .cloned()
    }

    async fn settings(&self, sink: &dyn MetricsSink) -> CycleSettings {
        let mut settings = CycleSettings::from_config(&self.config);
        if !self.config.pull_remote_config {
            return settings;
        }
        match sink.fetch_cluster_config(&self.config.cluster.name).await {
            Ok(remote) => {
                settings.apply_remote(&remote);
                debug!(
                    connector = %self.config.name,
                    alerting_rules = remote.alerting_rules.len(),
                    custom_metrics = remote.custom_metrics.len(),
                    "Applied remote cluster configuration"
                );
            }
            Err(e) => warn!(connector = %self.config.name, error = %e, "Using local configuration"),
        }
        settings
    }

    /// One full cycle. Returns an error only when the cycle could not reach
    /// collection; collector and dispatch failures are carried in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        match self.execute(started).await {
            Ok(report) => {
                let mut status = self.status.write().await;
                status.phase = CyclePhase::Idle;
                status.last_collection_time = Some(Utc::now());
                status.collected_count = report.collected;
                status.event_count = report.events;
                status.last_error = report.errors.last().cloned();
                status.consecutive_failures = 0;
                info!(
                    connector = %self.config.name,
                    collected = report.collected,
                    events = report.events,
                    errors = report.errors.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "Collection cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.record_failure(&e).await;
                Err(e)
            }
        }
    }

    pub async fn record_failure(&self, err: &Error) {
        let mut status = self.status.write().await;
        status.phase = CyclePhase::Error;
        status.last_error = Some(err.to_string());
        status.consecutive_failures += 1;
        error!(
            connector = %self.config.name,
            error = %err,
            consecutive_failures = status.consecutive_failures,
            "Collection cycle failed"
        );
        status.phase = CyclePhase::Idle;
    }

    /// Records a cycle interrupted by shutdown. Cancellation is not a failure,
    /// so the failure streak is left as it was.
    pub async fn record_cancelled(&self) {
        let mut status = self.status.write().await;
        status.last_error = Some(Error::Cancelled.to_string());
        status.phase = CyclePhase::Idle;
        info!(connector = %self.config.name, "Collection cycle cancelled");
    }

    async fn execute(&self, started: Instant) -> Result<CycleReport> {
        self.set_phase(CyclePhase::Initializing).await;
        let sink = self.sink().await?;
        let settings = self.settings(sink.as_ref()).await;

        match self.clients.usage.probe_time_series().await {
            Some(true) => debug!(connector = %self.config.name, "Time-series backend reachable"),
            Some(false) => warn!(connector = %self.config.name, "Time-series backend not answering"),
            None => {}
        }

        self.set_phase(CyclePhase::ContextResolving).await;
        let context = self.context.resolve(self.clients.cluster.as_ref()).await?;

        self.set_phase(CyclePhase::Collecting).await;
        let (batch, mut errors) = self.collect(&settings).await;

        self.set_phase(CyclePhase::Dispatching).await;
        let (events, resources): (Vec<_>, Vec<_>) = batch.into_iter().partition(|r| r.kind.is_event());
        let cluster_id = self.config.cluster.name.as_str();

        let send_resources = async {
            if resources.is_empty() {
                return Ok(());
            }
            sink.send_metrics(&resources).await
        };
        let send_events = async {
            if events.is_empty() {
                return Ok(());
            }
            sink.send_events(cluster_id, &context, &events).await
        };
        let (resources_sent, events_sent) = futures::join!(send_resources, send_events);

        if let Err(e) = resources_sent {
            error!(connector = %self.config.name, count = resources.len(), error = %e, "Failed to send resource metrics");
            errors.push(e.to_string());
        }
        if let Err(e) = events_sent {
            error!(connector = %self.config.name, count = events.len(), error = %e, "Failed to send event metrics");
            errors.push(e.to_string());
        }

        Ok(CycleReport {
            collected: resources.len(),
            events: events.len(),
            errors,
            next_interval: settings.collector.collection_interval,
            duration: started.elapsed(),
        })
    }

    /// Runs every enabled collector concurrently. A failing collector
    /// contributes nothing.
    async fn collect(&self, settings: &CycleSettings) -> (Vec<ResourceMetrics>, Vec<String>) {
        let collectors = build_collectors(
            &settings.kinds,
            self.clients.cluster.clone(),
            self.clients.usage.clone(),
            &settings.collector,
            &CostModel::new(settings.rates.clone()),
        );

        let results = join_all(collectors.iter().map(|c| async move {
            let started = Instant::now();
            let result = c.collect().await;
            (c.name(), result, started.elapsed())
        }))
        .await;

        let mut batch = Vec::new();
        let mut errors = Vec::new();
        for (name, result, elapsed) in results {
            match result {
                Ok(records) => {
                    debug!(collector = name, count = records.len(), duration_ms = elapsed.as_millis() as u64, "Collector finished");
                    batch.extend(records);
                }
                Err(e) => {
                    error!(collector = name, error = %e, "Collector failed");
                    errors.push(format!("{}: {}", name, e));
                }
            }
        }
        (batch, errors)
    }
}

/// Drives [`Orchestrator::run_cycle`] on a timer until shutdown. Cycles never
/// overlap; a shutdown signal drops the in-flight cycle.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let fallback = self.orchestrator.config().collector.collection_interval;
        info!(
            connector = %self.orchestrator.config().name,
            interval_secs = fallback.as_secs(),
            "Starting collection loop"
        );

        loop {
            let next = tokio::select! {
                outcome = self.orchestrator.run_cycle() => match outcome {
                    Ok(report) => report.next_interval,
                    Err(_) => fallback,
                },
                _ = shutdown.recv() => {
                    self.orchestrator.record_cancelled().await;
                    break;
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(next) => {}
                _ = shutdown.recv() => break,
            }
        }
        info!(connector = %self.orchestrator.config().name, "Shutting down collection loop");
    }
}
