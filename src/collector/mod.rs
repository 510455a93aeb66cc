//! One collector per resource kind. Each lists its kind cluster-wide, applies
//! the namespace filter and emits uniform [`ResourceMetrics`] records.

pub mod events;
pub mod ingresses;
pub mod namespaces;
pub mod nodes;
pub mod pods;
pub mod services;
pub mod volumes;
pub mod workloads;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::CollectorConfig;
use crate::cost::CostModel;
use crate::error::Result;
use crate::kubernetes::ClusterApi;
use crate::metrics::UsageSources;
use crate::types::ResourceMetrics;

pub use events::EventCollector;
pub use ingresses::IngressCollector;
pub use namespaces::NamespaceCollector;
pub use nodes::NodeCollector;
pub use pods::PodCollector;
pub use services::ServiceCollector;
pub use volumes::VolumeCollector;
pub use workloads::WorkloadCollector;

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// A listing failure for the whole kind is the only error returned;
    /// per-object problems are logged and skipped.
    async fn collect(&self) -> Result<Vec<ResourceMetrics>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectorKind {
    Pod,
    Node,
    PersistentVolume,
    Service,
    Namespace,
    Workload,
    Ingress,
    Event,
}

impl CollectorKind {
    pub const ALL: [CollectorKind; 8] = [
        CollectorKind::Pod,
        CollectorKind::Node,
        CollectorKind::PersistentVolume,
        CollectorKind::Service,
        CollectorKind::Namespace,
        CollectorKind::Workload,
        CollectorKind::Ingress,
        CollectorKind::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorKind::Pod => "pod",
            CollectorKind::Node => "node",
            CollectorKind::PersistentVolume => "persistentvolume",
            CollectorKind::Service => "service",
            CollectorKind::Namespace => "namespace",
            CollectorKind::Workload => "workload",
            CollectorKind::Ingress => "ingress",
            CollectorKind::Event => "event",
        }
    }

    /// Accepts singular and plural names, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let kind = match name.as_str() {
            "pod" | "pods" => CollectorKind::Pod,
            "node" | "nodes" => CollectorKind::Node,
            "persistentvolume" | "persistentvolumes" | "pv" | "pvs" => CollectorKind::PersistentVolume,
            "service" | "services" => CollectorKind::Service,
            "namespace" | "namespaces" => CollectorKind::Namespace,
            "workload" | "workloads" => CollectorKind::Workload,
            "ingress" | "ingresses" => CollectorKind::Ingress,
            "event" | "events" => CollectorKind::Event,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the enabled collectors over shared, read-only dependencies.
pub fn build_collectors(
    kinds: &[CollectorKind],
    api: Arc<dyn ClusterApi>,
    usage: UsageSources,
    config: &CollectorConfig,
    cost: &CostModel,
) -> Vec<Box<dyn Collector>> {
    let mut kinds = kinds.to_vec();
    kinds.sort();
    kinds.dedup();

    kinds
        .into_iter()
        .map(|kind| -> Box<dyn Collector> {
            let api = api.clone();
            let config = config.clone();
            match kind {
                CollectorKind::Pod => Box::new(PodCollector::new(api, usage.clone(), config, cost.clone())),
                CollectorKind::Node => Box::new(NodeCollector::new(api, usage.clone(), config, cost.clone())),
                CollectorKind::PersistentVolume => Box::new(VolumeCollector::new(api, config, cost.clone())),
                CollectorKind::Service => Box::new(ServiceCollector::new(api, config, cost.clone())),
                CollectorKind::Namespace => Box::new(NamespaceCollector::new(api, config)),
                CollectorKind::Workload => Box::new(WorkloadCollector::new(api, config)),
                CollectorKind::Ingress => Box::new(IngressCollector::new(api, config)),
                CollectorKind::Event => Box::new(EventCollector::new(api, config)),
            }
        })
        .collect()
}

/// Configured labels overlaid by the object's own labels.
pub(crate) fn record_labels(
    own: Option<&BTreeMap<String, String>>,
    config: &CollectorConfig,
) -> Option<BTreeMap<String, String>> {
    let mut labels = config.include_labels.clone();
    if let Some(own) = own {
        labels.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Some(labels)
}
