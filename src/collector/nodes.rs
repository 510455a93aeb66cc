use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::cost::CostModel;
use crate::error::{Error, Result};
use crate::kubernetes::ClusterApi;
use crate::metrics::{ResourceUsage, UsageSources};
use crate::parsing::{parse_cpu_to_nanocores, parse_memory_to_bytes};
use crate::types::{CpuMetrics, MemoryMetrics, NetworkMetrics, ResourceKind, ResourceMetrics, StorageMetrics};

/// Nodes are cluster-scoped, so the namespace filter does not apply.
pub struct NodeCollector {
    api: Arc<dyn ClusterApi>,
    usage: UsageSources,
    config: CollectorConfig,
    cost: CostModel,
}

impl NodeCollector {
    pub fn new(api: Arc<dyn ClusterApi>, usage: UsageSources, config: CollectorConfig, cost: CostModel) -> Self {
        Self {
            api,
            usage,
            config,
            cost,
        }
    }
}

#[async_trait]
impl Collector for NodeCollector {
    fn name(&self) -> &'static str {
        "node-collector"
    }

    fn description(&self) -> &'static str {
        "Collects resource usage metrics for Kubernetes nodes"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let nodes = self
            .api
            .list_nodes()
            .await
            .map_err(|e| Error::list(ResourceKind::Node, e))?;
        let snapshot = self.usage.node_snapshot().await;

        let mut records = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let name = node.metadata.name.as_deref().unwrap_or_default();
            let usage = self.usage.resolve_node(name, &snapshot).await;
            records.push(build_node_record(node, usage, &self.config, &self.cost));
        }
        debug!(collector = self.name(), count = records.len(), "Collected nodes");
        Ok(records)
    }
}

/// Allocatable (nanocores, bytes); missing or unparseable quantities are zero.
pub fn allocatable(node: &Node) -> (i64, i64) {
    let alloc = node.status.as_ref().and_then(|s| s.allocatable.as_ref());
    let cpu = alloc
        .and_then(|a| a.get("cpu"))
        .and_then(|q| parse_cpu_to_nanocores(&q.0))
        .unwrap_or(0);
    let memory = alloc
        .and_then(|a| a.get("memory"))
        .and_then(|q| parse_memory_to_bytes(&q.0))
        .unwrap_or(0);
    (cpu, memory)
}

fn has_disk_pressure(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "DiskPressure" && c.status == "True"))
        .unwrap_or(false)
}

fn has_internal_ip(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .map(|addrs| addrs.iter().any(|a| a.type_ == "InternalIP"))
        .unwrap_or(false)
}

pub fn build_node_record(node: &Node, usage: ResourceUsage, config: &CollectorConfig, cost: &CostModel) -> ResourceMetrics {
    let mut record = ResourceMetrics::new(
        ResourceKind::Node,
        node.metadata.name.clone().unwrap_or_default(),
        None,
        record_labels(node.metadata.labels.as_ref(), config),
    );

    record.cpu = CpuMetrics::from_nanocores(usage.cpu_nanocores);
    record.memory = MemoryMetrics::from_bytes(usage.memory_bytes);
    record.storage = StorageMetrics {
        disk_pressure: has_disk_pressure(node),
        ..Default::default()
    };
    record.network = NetworkMetrics {
        tx_packets: i64::from(has_internal_ip(node)),
        ..Default::default()
    };

    let (alloc_cpu, alloc_memory) = allocatable(node);
    record.cost = cost.node_cost(alloc_cpu, alloc_memory, &record.cpu, &record.memory);
    record
}
