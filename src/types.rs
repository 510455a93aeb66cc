use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const NANOCORES_PER_CORE: f64 = 1e9;
pub const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Node,
    PersistentVolume,
    Service,
    Namespace,
    Deployment,
    StatefulSet,
    DaemonSet,
    Ingress,
    Event,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Node => "Node",
            ResourceKind::PersistentVolume => "PersistentVolume",
            ResourceKind::Service => "Service",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Event => "Event",
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, ResourceKind::Event)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuMetrics {
    pub usage_nano_cores: i64,
    pub usage_core_percent: f64,
    pub request_milli_cores: i64,
    pub limit_milli_cores: i64,
    pub throttling_seconds: f64,
}

impl CpuMetrics {
    /// The core ratio is always derived from the nanocore value.
    pub fn from_nanocores(nanocores: i64) -> Self {
        let mut cpu = CpuMetrics::default();
        cpu.set_usage(nanocores);
        cpu
    }

    pub fn set_usage(&mut self, nanocores: i64) {
        self.usage_nano_cores = nanocores.max(0);
        self.usage_core_percent = self.usage_nano_cores as f64 / NANOCORES_PER_CORE;
    }

    pub fn usage_cores(&self) -> f64 {
        self.usage_core_percent
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryMetrics {
    pub usage_bytes: i64,
    pub request_bytes: i64,
    pub limit_bytes: i64,
    pub rss_bytes: i64,
    pub page_faults: i64,
    pub major_page_faults: i64,
}

impl MemoryMetrics {
    pub fn from_bytes(bytes: i64) -> Self {
        MemoryMetrics {
            usage_bytes: bytes.max(0),
            ..Default::default()
        }
    }

    pub fn usage_gb(&self) -> f64 {
        self.usage_bytes as f64 / BYTES_PER_GB
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageMetrics {
    pub usage_bytes: i64,
    pub capacity_bytes: i64,
    pub available: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvc_name: Option<String>,
    pub disk_pressure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkMetrics {
    pub rx_bytes: i64,
    pub tx_bytes: i64,
    pub rx_packets: i64,
    pub tx_packets: i64,
    pub rx_errors: i64,
    pub tx_errors: i64,
    pub rx_dropped: i64,
    pub tx_dropped: i64,
}

/// Per-record cost. The total is only ever computed as the sum of its parts,
/// including on decode, where a received `totalCost` is discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireCostMetrics")]
pub struct CostMetrics {
    pub cpu_cost: f64,
    pub memory_cost: f64,
    pub storage_cost: f64,
    pub network_cost: f64,
    total_cost: f64,
    pub currency: String,
}

impl CostMetrics {
    pub fn new(
        currency: impl Into<String>,
        cpu_cost: f64,
        memory_cost: f64,
        storage_cost: f64,
        network_cost: f64,
    ) -> Self {
        CostMetrics {
            cpu_cost,
            memory_cost,
            storage_cost,
            network_cost,
            total_cost: cpu_cost + memory_cost + storage_cost + network_cost,
            currency: currency.into(),
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WireCostMetrics {
    cpu_cost: f64,
    memory_cost: f64,
    storage_cost: f64,
    network_cost: f64,
    currency: String,
}

impl From<WireCostMetrics> for CostMetrics {
    fn from(wire: WireCostMetrics) -> Self {
        CostMetrics::new(
            wire.currency,
            wire.cpu_cost,
            wire.memory_cost,
            wire.storage_cost,
            wire.network_cost,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Running,
    Waiting,
    Terminated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetrics {
    pub name: String,
    pub ready: bool,
    pub restarts: i32,
    pub state: ContainerState,
    #[serde(default)]
    pub cpu: CpuMetrics,
    #[serde(default)]
    pub memory: MemoryMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

impl Severity {
    /// Only the exact event type `Warning` is a warning.
    pub fn from_event_type(event_type: &str) -> Self {
        if event_type == "Warning" {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSourceRef {
    pub component: String,
    pub host: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStatus {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub count: i32,
    pub source: EventSourceRef,
    pub involved_object: ObjectRef,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStatus {
    pub phase: String,
    pub age: String,
    pub finalizers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentStatus {
    pub replicas: i32,
    pub available_replicas: i32,
    pub updated_replicas: i32,
    pub ready_replicas: i32,
    pub observed_generation: Option<i64>,
    pub conditions: Vec<WorkloadCondition>,
    pub collision_count: Option<i32>,
    pub strategy: Option<String>,
    pub min_ready_seconds: Option<i32>,
    pub revision_history_limit: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatefulSetStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub current_replicas: i32,
    pub updated_replicas: i32,
    pub observed_generation: Option<i64>,
    pub conditions: Vec<WorkloadCondition>,
    pub update_strategy: Option<String>,
    pub service_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonSetStatus {
    pub desired_number_scheduled: i32,
    pub current_number_scheduled: i32,
    pub number_ready: i32,
    pub updated_number_scheduled: i32,
    pub number_available: i32,
    pub number_unavailable: i32,
    pub observed_generation: Option<i64>,
    pub conditions: Vec<WorkloadCondition>,
    pub update_strategy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBackend {
    pub name: String,
    #[serde(default)]
    pub port: BackendPort,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngressBackendSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressPathSummary {
    pub path: String,
    pub path_type: String,
    pub backend: IngressBackendSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRuleSummary {
    pub host: String,
    pub paths: Vec<IngressPathSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressTlsSummary {
    pub hosts: Vec<String>,
    pub secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressStatus {
    pub load_balancer: Vec<String>,
    pub class: Option<String>,
    pub rules: Vec<IngressRuleSummary>,
    pub tls: Vec<IngressTlsSummary>,
}

/// Kind-specific status payload. Serialized as a plain object; on decode the
/// record's `kind` selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceStatus {
    Event(EventStatus),
    Namespace(NamespaceStatus),
    Deployment(DeploymentStatus),
    StatefulSet(StatefulSetStatus),
    DaemonSet(DaemonSetStatus),
    Ingress(IngressStatus),
}

impl ResourceStatus {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceStatus::Event(_) => ResourceKind::Event,
            ResourceStatus::Namespace(_) => ResourceKind::Namespace,
            ResourceStatus::Deployment(_) => ResourceKind::Deployment,
            ResourceStatus::StatefulSet(_) => ResourceKind::StatefulSet,
            ResourceStatus::DaemonSet(_) => ResourceKind::DaemonSet,
            ResourceStatus::Ingress(_) => ResourceKind::Ingress,
        }
    }

    pub fn from_value(kind: ResourceKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error as _;
        let status = match kind {
            ResourceKind::Event => ResourceStatus::Event(serde_json::from_value(value)?),
            ResourceKind::Namespace => ResourceStatus::Namespace(serde_json::from_value(value)?),
            ResourceKind::Deployment => ResourceStatus::Deployment(serde_json::from_value(value)?),
            ResourceKind::StatefulSet => ResourceStatus::StatefulSet(serde_json::from_value(value)?),
            ResourceKind::DaemonSet => ResourceStatus::DaemonSet(serde_json::from_value(value)?),
            ResourceKind::Ingress => ResourceStatus::Ingress(serde_json::from_value(value)?),
            other => {
                return Err(serde_json::Error::custom(format!(
                    "{} records carry no status",
                    other
                )))
            }
        };
        Ok(status)
    }

    pub fn as_event(&self) -> Option<&EventStatus> {
        match self {
            ResourceStatus::Event(e) => Some(e),
            _ => None,
        }
    }
}

/// One record per observed Kubernetes object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireResourceMetrics")]
pub struct ResourceMetrics {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub kind: ResourceKind,
    pub labels: BTreeMap<String, String>,
    pub collected_at: DateTime<Utc>,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub storage: StorageMetrics,
    pub network: NetworkMetrics,
    pub cost: CostMetrics,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ResourceStatus>,
}

impl ResourceMetrics {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        namespace: Option<String>,
        labels: Option<BTreeMap<String, String>>,
    ) -> Self {
        ResourceMetrics {
            name: name.into(),
            namespace,
            kind,
            labels: labels.unwrap_or_default(),
            collected_at: Utc::now(),
            cpu: CpuMetrics::default(),
            memory: MemoryMetrics::default(),
            storage: StorageMetrics::default(),
            network: NetworkMetrics::default(),
            cost: CostMetrics::default(),
            containers: Vec::new(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn event_status(&self) -> Option<&EventStatus> {
        self.status.as_ref().and_then(|s| s.as_event())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResourceMetrics {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    kind: ResourceKind,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    collected_at: DateTime<Utc>,
    #[serde(default)]
    cpu: CpuMetrics,
    #[serde(default)]
    memory: MemoryMetrics,
    #[serde(default)]
    storage: StorageMetrics,
    #[serde(default)]
    network: NetworkMetrics,
    #[serde(default)]
    cost: CostMetrics,
    #[serde(default)]
    containers: Vec<ContainerMetrics>,
    #[serde(default)]
    status: Option<serde_json::Value>,
}

impl TryFrom<WireResourceMetrics> for ResourceMetrics {
    type Error = serde_json::Error;

    fn try_from(wire: WireResourceMetrics) -> Result<Self, Self::Error> {
        let status = match wire.status {
            Some(serde_json::Value::Null) | None => None,
            Some(value) => Some(ResourceStatus::from_value(wire.kind, value)?),
        };
        Ok(ResourceMetrics {
            name: wire.name,
            namespace: wire.namespace,
            kind: wire.kind,
            labels: wire.labels,
            collected_at: wire.collected_at,
            cpu: wire.cpu,
            memory: wire.memory,
            storage: wire.storage,
            network: wire.network,
            cost: wire.cost,
            containers: wire.containers,
            status,
        })
    }
}
