//! Usage sources. A time-series backend answers per-object queries; the
//! cluster metrics API is listed once per collection and fills whatever the
//! time-series backend left at zero.

pub mod prometheus;
pub mod server;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::NANOCORES_PER_CORE;

pub use prometheus::PrometheusClient;
pub use server::MetricsServerClient;

/// Point-in-time CPU and memory usage for one object or container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub cpu_nanocores: i64,
    pub memory_bytes: i64,
}

impl ResourceUsage {
    pub fn new(cpu_nanocores: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_nanocores: cpu_nanocores.max(0),
            memory_bytes: memory_bytes.max(0),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_nanocores == 0 && self.memory_bytes == 0
    }

    /// Copies fields from `other` only where this usage is still zero.
    pub fn fill_gaps(&mut self, other: &ResourceUsage) {
        if self.cpu_nanocores == 0 {
            self.cpu_nanocores = other.cpu_nanocores.max(0);
        }
        if self.memory_bytes == 0 {
            self.memory_bytes = other.memory_bytes.max(0);
        }
    }
}

impl std::ops::AddAssign for ResourceUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.cpu_nanocores += rhs.cpu_nanocores;
        self.memory_bytes += rhs.memory_bytes;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeUsageSample {
    pub name: String,
    pub usage: ResourceUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerUsageSample {
    pub name: String,
    pub usage: ResourceUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodUsageSample {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<ContainerUsageSample>,
}

/// The cluster-native metrics API (metrics.k8s.io).
#[async_trait]
pub trait MetricsApi: Send + Sync {
    async fn node_usage(&self) -> Result<Vec<NodeUsageSample>>;
    async fn pod_usage(&self) -> Result<Vec<PodUsageSample>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// A Prometheus-compatible instant query endpoint.
#[async_trait]
pub trait TimeSeriesApi: Send + Sync {
    async fn instant_query(&self, promql: &str, at: DateTime<Utc>) -> Result<Vec<VectorSample>>;
}

/// Metrics API usage keyed by node name.
pub type NodeSnapshot = HashMap<String, ResourceUsage>;

/// Metrics API usage keyed by (namespace, pod), then container name.
pub type PodSnapshot = HashMap<(String, String), BTreeMap<String, ResourceUsage>>;

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn node_cpu_query(node: &str) -> String {
    format!(
        r#"sum(rate(node_cpu_seconds_total{{mode!="idle",node="{}"}}[5m]))"#,
        escape_label(node)
    )
}

pub fn node_memory_query(node: &str) -> String {
    let node = escape_label(node);
    format!(
        r#"node_memory_MemTotal_bytes{{node="{0}"}} - node_memory_MemAvailable_bytes{{node="{0}"}}"#,
        node
    )
}

pub fn container_cpu_query(namespace: &str, pod: &str) -> String {
    format!(
        r#"sum(rate(container_cpu_usage_seconds_total{{namespace="{}",pod="{}"}}[5m])) by (container)"#,
        escape_label(namespace),
        escape_label(pod)
    )
}

pub fn container_memory_query(namespace: &str, pod: &str) -> String {
    format!(
        r#"sum(container_memory_working_set_bytes{{namespace="{}",pod="{}"}}) by (container)"#,
        escape_label(namespace),
        escape_label(pod)
    )
}

fn cores_to_nanocores(cores: f64) -> i64 {
    if !cores.is_finite() || cores <= 0.0 {
        return 0;
    }
    (cores * NANOCORES_PER_CORE).round() as i64
}

fn bytes_from_sample(value: f64) -> i64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round() as i64
}

/// Cgroup-level series (empty container label or the pause container) are
/// not real containers.
fn container_label(sample: &VectorSample) -> Option<&str> {
    match sample.labels.get("container").map(String::as_str) {
        Some("") | Some("POD") | None => None,
        Some(name) => Some(name),
    }
}

/// The configured usage sources for one connector.
#[derive(Clone, Default)]
pub struct UsageSources {
    time_series: Option<Arc<dyn TimeSeriesApi>>,
    metrics_api: Option<Arc<dyn MetricsApi>>,
}

impl UsageSources {
    pub fn new(time_series: Option<Arc<dyn TimeSeriesApi>>, metrics_api: Option<Arc<dyn MetricsApi>>) -> Self {
        Self {
            time_series,
            metrics_api,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn has_time_series(&self) -> bool {
        self.time_series.is_some()
    }

    pub fn has_metrics_api(&self) -> bool {
        self.metrics_api.is_some()
    }

    /// Lists node usage from the metrics API. A failure yields an empty
    /// snapshot so every node falls back to zero usage.
    pub async fn node_snapshot(&self) -> NodeSnapshot {
        let Some(api) = &self.metrics_api else {
            return NodeSnapshot::new();
        };
        match api.node_usage().await {
            Ok(samples) => samples.into_iter().map(|s| (s.name, s.usage)).collect(),
            Err(e) => {
                warn!(error = %e, "Node metrics unavailable from metrics API");
                NodeSnapshot::new()
            }
        }
    }

    pub async fn pod_snapshot(&self) -> PodSnapshot {
        let Some(api) = &self.metrics_api else {
            return PodSnapshot::new();
        };
        match api.pod_usage().await {
            Ok(samples) => samples
                .into_iter()
                .map(|pod| {
                    let containers = pod.containers.into_iter().map(|c| (c.name, c.usage)).collect();
                    ((pod.namespace, pod.name), containers)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Pod metrics unavailable from metrics API");
                PodSnapshot::new()
            }
        }
    }

    /// Whole-node usage: time-series first, then the snapshot fills zero fields.
    pub async fn resolve_node(&self, node: &str, snapshot: &NodeSnapshot) -> ResourceUsage {
        let mut usage = ResourceUsage::default();

        if let Some(ts) = &self.time_series {
            usage = query_node(ts.as_ref(), node).await;
        }

        if let Some(fallback) = snapshot.get(node) {
            usage.fill_gaps(fallback);
        }
        usage
    }

    /// Per-container usage for one pod, resolved container by container.
    pub async fn resolve_pod_containers(
        &self,
        namespace: &str,
        pod: &str,
        snapshot: &PodSnapshot,
    ) -> BTreeMap<String, ResourceUsage> {
        let mut containers = BTreeMap::new();

        if let Some(ts) = &self.time_series {
            containers = query_pod(ts.as_ref(), namespace, pod).await;
        }

        if let Some(fallback) = snapshot.get(&(namespace.to_string(), pod.to_string())) {
            for (name, usage) in fallback {
                containers
                    .entry(name.clone())
                    .or_insert_with(ResourceUsage::default)
                    .fill_gaps(usage);
            }
        }
        containers
    }

    /// Connectivity check against the time-series backend. `None` when no
    /// backend is configured.
    pub async fn probe_time_series(&self) -> Option<bool> {
        let ts = self.time_series.as_ref()?;
        let reachable = match ts.instant_query("up", Utc::now()).await {
            Ok(samples) => {
                debug!(targets = samples.len(), "Time-series backend reachable");
                true
            }
            Err(e) => {
                warn!(error = %e, "Time-series backend unreachable");
                false
            }
        };
        Some(reachable)
    }
}

/// Runs one query; a failure is logged and reads as no samples, so the other
/// field of the same object keeps whatever it resolved to.
async fn query_field(ts: &dyn TimeSeriesApi, promql: &str, at: DateTime<Utc>, object: &str) -> Vec<VectorSample> {
    match ts.instant_query(promql, at).await {
        Ok(samples) => samples,
        Err(e) => {
            warn!(object, query = promql, error = %e, "Time-series query failed");
            Vec::new()
        }
    }
}

async fn query_node(ts: &dyn TimeSeriesApi, node: &str) -> ResourceUsage {
    let now = Utc::now();
    let cpu = query_field(ts, &node_cpu_query(node), now, node).await;
    let memory = query_field(ts, &node_memory_query(node), now, node).await;

    ResourceUsage::new(
        cpu.first().map(|s| cores_to_nanocores(s.value)).unwrap_or(0),
        memory.first().map(|s| bytes_from_sample(s.value)).unwrap_or(0),
    )
}

async fn query_pod(ts: &dyn TimeSeriesApi, namespace: &str, pod: &str) -> BTreeMap<String, ResourceUsage> {
    let now = Utc::now();
    let object = format!("{}/{}", namespace, pod);
    let cpu = query_field(ts, &container_cpu_query(namespace, pod), now, &object).await;
    let memory = query_field(ts, &container_memory_query(namespace, pod), now, &object).await;

    let mut containers: BTreeMap<String, ResourceUsage> = BTreeMap::new();
    for sample in &cpu {
        if let Some(name) = container_label(sample) {
            containers.entry(name.to_string()).or_default().cpu_nanocores = cores_to_nanocores(sample.value);
        }
    }
    for sample in &memory {
        if let Some(name) = container_label(sample) {
            containers.entry(name.to_string()).or_default().memory_bytes = bytes_from_sample(sample.value);
        }
    }
    containers
}

/// Fixed-answer sources for tests and dry runs.
pub mod mock {
    use super::*;
    use crate::error::Error;

    #[derive(Debug, Clone, Default)]
    pub struct MockMetricsApi {
        pub nodes: Vec<NodeUsageSample>,
        pub pods: Vec<PodUsageSample>,
        pub fail: bool,
    }

    impl MockMetricsApi {
        pub fn with_node(mut self, name: &str, cpu_nanocores: i64, memory_bytes: i64) -> Self {
            self.nodes.push(NodeUsageSample {
                name: name.to_string(),
                usage: ResourceUsage::new(cpu_nanocores, memory_bytes),
            });
            self
        }

        pub fn with_container(
            mut self,
            namespace: &str,
            pod: &str,
            container: &str,
            cpu_nanocores: i64,
            memory_bytes: i64,
        ) -> Self {
            let sample = ContainerUsageSample {
                name: container.to_string(),
                usage: ResourceUsage::new(cpu_nanocores, memory_bytes),
            };
            match self.pods.iter_mut().find(|p| p.namespace == namespace && p.name == pod) {
                Some(existing) => existing.containers.push(sample),
                None => self.pods.push(PodUsageSample {
                    namespace: namespace.to_string(),
                    name: pod.to_string(),
                    containers: vec![sample],
                }),
            }
            self
        }
    }

    #[async_trait]
    impl MetricsApi for MockMetricsApi {
        async fn node_usage(&self) -> Result<Vec<NodeUsageSample>> {
            if self.fail {
                return Err(Error::UsageSource("metrics API unavailable".to_string()));
            }
            Ok(self.nodes.clone())
        }

        async fn pod_usage(&self) -> Result<Vec<PodUsageSample>> {
            if self.fail {
                return Err(Error::UsageSource("metrics API unavailable".to_string()));
            }
            Ok(self.pods.clone())
        }
    }

    /// Answers queries by exact PromQL text. Unknown queries return an empty
    /// vector; queries listed in `failing` return an error.
    #[derive(Debug, Clone, Default)]
    pub struct MockTimeSeries {
        pub answers: HashMap<String, Vec<VectorSample>>,
        pub failing: Vec<String>,
    }

    impl MockTimeSeries {
        pub fn answer(mut self, promql: String, samples: Vec<VectorSample>) -> Self {
            self.answers.insert(promql, samples);
            self
        }

        pub fn scalar(self, promql: String, value: f64) -> Self {
            self.answer(
                promql,
                vec![VectorSample {
                    labels: BTreeMap::new(),
                    value,
                }],
            )
        }

        pub fn fail(mut self, promql: String) -> Self {
            self.failing.push(promql);
            self
        }
    }

    pub fn container_sample(container: &str, value: f64) -> VectorSample {
        let mut labels = BTreeMap::new();
        labels.insert("container".to_string(), container.to_string());
        VectorSample { labels, value }
    }

    #[async_trait]
    impl TimeSeriesApi for MockTimeSeries {
        async fn instant_query(&self, promql: &str, _at: DateTime<Utc>) -> Result<Vec<VectorSample>> {
            if self.failing.iter().any(|q| q == promql) {
                return Err(Error::UsageSource(format!("query failed: {}", promql)));
            }
            Ok(self.answers.get(promql).cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    const GIB: i64 = 1 << 30;

    fn sources(ts: Option<MockTimeSeries>, api: Option<MockMetricsApi>) -> UsageSources {
        UsageSources::new(
            ts.map(|t| Arc::new(t) as Arc<dyn TimeSeriesApi>),
            api.map(|a| Arc::new(a) as Arc<dyn MetricsApi>),
        )
    }

    #[test]
    fn test_fill_gaps_only_replaces_zero_fields() {
        let mut usage = ResourceUsage::new(2_000_000_000, 0);
        usage.fill_gaps(&ResourceUsage::new(1, GIB));
        assert_eq!(usage, ResourceUsage::new(2_000_000_000, GIB));
    }

    #[test]
    fn test_queries_escape_labels() {
        assert_eq!(
            node_cpu_query("node-1"),
            r#"sum(rate(node_cpu_seconds_total{mode!="idle",node="node-1"}[5m]))"#
        );
        assert!(container_memory_query("default", "we\"b").contains(r#"pod="we\"b""#));
    }

    #[tokio::test]
    async fn test_node_time_series_wins_over_metrics_api() {
        let ts = MockTimeSeries::default().scalar(node_cpu_query("node-1"), 2.0);
        let api = MockMetricsApi::default().with_node("node-1", 500_000_000, 4 * GIB);
        let sources = sources(Some(ts), Some(api));

        let snapshot = sources.node_snapshot().await;
        let usage = sources.resolve_node("node-1", &snapshot).await;

        assert_eq!(usage.cpu_nanocores, 2_000_000_000);
        // memory was unanswered by the time series, so the metrics API fills it
        assert_eq!(usage.memory_bytes, 4 * GIB);
    }

    #[tokio::test]
    async fn test_time_series_failure_falls_back() {
        let ts = MockTimeSeries::default().fail(node_cpu_query("node-1"));
        let api = MockMetricsApi::default().with_node("node-1", 500_000_000, GIB);
        let sources = sources(Some(ts), Some(api));

        let snapshot = sources.node_snapshot().await;
        let usage = sources.resolve_node("node-1", &snapshot).await;
        assert_eq!(usage, ResourceUsage::new(500_000_000, GIB));
    }

    #[tokio::test]
    async fn test_failed_memory_query_keeps_primary_cpu() {
        let ts = MockTimeSeries::default()
            .scalar(node_cpu_query("node-1"), 2.0)
            .fail(node_memory_query("node-1"));
        let api = MockMetricsApi::default().with_node("node-1", 500_000_000, GIB);
        let sources = sources(Some(ts), Some(api));

        let snapshot = sources.node_snapshot().await;
        let usage = sources.resolve_node("node-1", &snapshot).await;
        assert_eq!(usage, ResourceUsage::new(2_000_000_000, GIB));
    }

    #[tokio::test]
    async fn test_failed_container_memory_query_keeps_primary_cpu() {
        let ts = MockTimeSeries::default()
            .answer(container_cpu_query("default", "web"), vec![container_sample("app", 0.75)])
            .fail(container_memory_query("default", "web"));
        let api = MockMetricsApi::default().with_container("default", "web", "app", 100_000_000, 128 << 20);
        let sources = sources(Some(ts), Some(api));

        let snapshot = sources.pod_snapshot().await;
        let containers = sources.resolve_pod_containers("default", "web", &snapshot).await;
        assert_eq!(containers["app"], ResourceUsage::new(750_000_000, 128 << 20));
    }

    #[tokio::test]
    async fn test_no_sources_yield_zero() {
        let sources = UsageSources::none();
        let snapshot = sources.pod_snapshot().await;
        let usage = sources.resolve_pod_containers("default", "web", &snapshot).await;
        assert!(usage.is_empty());
        assert_eq!(sources.probe_time_series().await, None);
    }

    #[tokio::test]
    async fn test_pod_containers_resolved_per_container() {
        let ts = MockTimeSeries::default().answer(
            container_cpu_query("default", "web"),
            vec![
                container_sample("app", 0.25),
                container_sample("", 0.5),
                container_sample("POD", 0.01),
            ],
        );
        let api = MockMetricsApi::default()
            .with_container("default", "web", "app", 100_000_000, 256 << 20)
            .with_container("default", "web", "sidecar", 10_000_000, 64 << 20);
        let sources = sources(Some(ts), Some(api));

        let snapshot = sources.pod_snapshot().await;
        let containers = sources.resolve_pod_containers("default", "web", &snapshot).await;

        assert_eq!(containers.len(), 2);
        assert_eq!(containers["app"], ResourceUsage::new(250_000_000, 256 << 20));
        assert_eq!(containers["sidecar"], ResourceUsage::new(10_000_000, 64 << 20));
    }

    #[tokio::test]
    async fn test_metrics_api_failure_is_empty_snapshot() {
        let api = MockMetricsApi {
            fail: true,
            ..Default::default()
        };
        let sources = sources(None, Some(api));
        assert!(sources.node_snapshot().await.is_empty());
        assert!(sources.pod_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_probe_reports_reachability() {
        let ok = sources(Some(MockTimeSeries::default()), None);
        assert_eq!(ok.probe_time_series().await, Some(true));

        let down = sources(Some(MockTimeSeries::default().fail("up".to_string())), None);
        assert_eq!(down.probe_time_series().await, Some(false));
    }
}
