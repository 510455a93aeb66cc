use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::cost::CostModel;
use crate::error::{Error, Result};
use crate::filter::included;
use crate::kubernetes::ClusterApi;
use crate::metrics::{ResourceUsage, UsageSources};
use crate::parsing::{parse_cpu_to_millicores, parse_memory_to_bytes};
use crate::types::{
    ContainerMetrics, ContainerState, CpuMetrics, MemoryMetrics, NetworkMetrics, ResourceKind, ResourceMetrics,
    StorageMetrics,
};

pub struct PodCollector {
    api: Arc<dyn ClusterApi>,
    usage: UsageSources,
    config: CollectorConfig,
    cost: CostModel,
}

impl PodCollector {
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
impl Collector for PodCollector {
    fn name(&self) -> &'static str {
        "pod-collector"
    }

    fn description(&self) -> &'static str {
        "Collects resource usage metrics for Kubernetes pods"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let pods = self
            .api
            .list_pods()
            .await
            .map_err(|e| Error::list(ResourceKind::Pod, e))?;
        let snapshot = self.usage.pod_snapshot().await;

        let mut records = Vec::new();
        for pod in &pods {
            let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
            if !included(namespace, &self.config) {
                continue;
            }
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            let usage = self.usage.resolve_pod_containers(namespace, name, &snapshot).await;
            records.push(build_pod_record(pod, &usage, &self.config, &self.cost));
        }
        debug!(collector = self.name(), count = records.len(), "Collected pods");
        Ok(records)
    }
}

fn quantity<'a>(map: Option<&'a BTreeMap<String, Quantity>>, key: &str) -> Option<&'a str> {
    map.and_then(|m| m.get(key)).map(|q| q.0.as_str())
}

/// (cpu request, cpu limit) in millicores and (memory request, memory limit)
/// in bytes, as declared by one container.
fn declared_resources(container: &Container) -> ((i64, i64), (i64, i64)) {
    let Some(resources) = container.resources.as_ref() else {
        return ((0, 0), (0, 0));
    };
    let requests = resources.requests.as_ref();
    let limits = resources.limits.as_ref();
    let cpu = |m| quantity(m, "cpu").and_then(parse_cpu_to_millicores).unwrap_or(0);
    let memory = |m| quantity(m, "memory").and_then(parse_memory_to_bytes).unwrap_or(0);
    ((cpu(requests), cpu(limits)), (memory(requests), memory(limits)))
}

fn container_state(status: &ContainerStatus) -> ContainerState {
    match status.state.as_ref() {
        Some(s) if s.running.is_some() => ContainerState::Running,
        Some(s) if s.waiting.is_some() => ContainerState::Waiting,
        Some(s) if s.terminated.is_some() => ContainerState::Terminated,
        _ => ContainerState::Unknown,
    }
}

fn pod_storage(pod: &Pod) -> StorageMetrics {
    let mut storage = StorageMetrics::default();
    let status = pod.status.as_ref();
    let disk_pressure = status.and_then(|s| s.phase.as_deref()) == Some("Pending")
        && status.and_then(|s| s.reason.as_deref()) == Some("Unschedulable")
        && status
            .and_then(|s| s.message.as_deref())
            .map(|m| m.contains("disk pressure"))
            .unwrap_or(false);

    let volumes = pod.spec.as_ref().and_then(|s| s.volumes.as_ref());
    for volume in volumes.into_iter().flatten() {
        if let Some(claim) = &volume.persistent_volume_claim {
            storage.pvc_name = Some(claim.claim_name.clone());
            storage.disk_pressure = disk_pressure;
        }
    }
    storage
}

/// Network is estimated from memory activity; no per-pod network source exists.
fn estimated_network<'a>(usages: impl Iterator<Item = &'a ResourceUsage>) -> NetworkMetrics {
    let mut network = NetworkMetrics::default();
    for usage in usages.filter(|u| u.memory_bytes > 0) {
        network.rx_bytes += usage.memory_bytes / 10;
        network.tx_bytes += usage.memory_bytes / 20;
    }
    network
}

pub fn build_pod_record(
    pod: &Pod,
    usage: &BTreeMap<String, ResourceUsage>,
    config: &CollectorConfig,
    cost: &CostModel,
) -> ResourceMetrics {
    let mut record = ResourceMetrics::new(
        ResourceKind::Pod,
        pod.metadata.name.clone().unwrap_or_default(),
        pod.metadata.namespace.clone(),
        record_labels(pod.metadata.labels.as_ref(), config),
    );

    let spec_containers: &[Container] = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or(&[]);

    let mut total = ResourceUsage::default();
    for container_usage in usage.values() {
        total += *container_usage;
    }

    let mut cpu = CpuMetrics::from_nanocores(total.cpu_nanocores);
    let mut memory = MemoryMetrics::from_bytes(total.memory_bytes);
    for container in spec_containers {
        let ((cpu_req, cpu_lim), (mem_req, mem_lim)) = declared_resources(container);
        cpu.request_milli_cores += cpu_req;
        cpu.limit_milli_cores += cpu_lim;
        memory.request_bytes += mem_req;
        memory.limit_bytes += mem_lim;
    }

    record.cost = cost.pod_cost(&cpu, &memory);
    record.cpu = cpu;
    record.memory = memory;
    record.storage = pod_storage(pod);
    record.network = estimated_network(usage.values());

    let statuses = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref());
    record.containers = statuses
        .into_iter()
        .flatten()
        .map(|status| {
            let found = usage.get(&status.name).copied().unwrap_or_default();
            let mut cpu = CpuMetrics::from_nanocores(found.cpu_nanocores);
            let mut memory = MemoryMetrics::from_bytes(found.memory_bytes);
            if let Some(spec) = spec_containers.iter().find(|c| c.name == status.name) {
                let ((cpu_req, cpu_lim), (mem_req, mem_lim)) = declared_resources(spec);
                cpu.request_milli_cores = cpu_req;
                cpu.limit_milli_cores = cpu_lim;
                memory.request_bytes = mem_req;
                memory.limit_bytes = mem_lim;
            }
            ContainerMetrics {
                name: status.name.clone(),
                ready: status.ready,
                restarts: status.restart_count,
                state: container_state(status),
                cpu,
                memory,
            }
        })
        .collect();

    record
}
