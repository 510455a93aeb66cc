use async_trait::async_trait;
use http::Request as HttpRequest;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use super::{ContainerUsageSample, MetricsApi, NodeUsageSample, PodUsageSample, ResourceUsage};
use crate::error::{Error, Result};
use crate::parsing::{parse_cpu_to_nanocores, parse_memory_to_bytes};

const NODES_PATH: &str = "/apis/metrics.k8s.io/v1beta1/nodes";
const PODS_PATH: &str = "/apis/metrics.k8s.io/v1beta1/pods";

#[derive(Debug, Default, Deserialize)]
struct ItemMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct NodeMetricsItem {
    metadata: ItemMeta,
    #[serde(default)]
    usage: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetricsItem {
    name: String,
    #[serde(default)]
    usage: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodMetricsItem {
    metadata: ItemMeta,
    #[serde(default)]
    containers: Vec<ContainerMetricsItem>,
}

#[derive(Debug, Deserialize)]
struct MetricsList<T> {
    items: Vec<T>,
}

/// metrics.k8s.io served by metrics-server, queried with raw requests since
/// k8s-openapi carries no types for it.
pub struct MetricsServerClient {
    client: Client,
}

impl MetricsServerClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let req = HttpRequest::builder()
            .method("GET")
            .uri(path)
            .body(Vec::new())
            .map_err(|e| Error::UsageSource(format!("build request: {}", e)))?;
        let list: MetricsList<T> = self
            .client
            .request(req)
            .await
            .map_err(|e| Error::UsageSource(format!("{}: {}", path, e)))?;
        Ok(list.items)
    }
}

/// Unparseable quantities count as zero.
fn usage_from_map(usage: &HashMap<String, String>) -> ResourceUsage {
    let cpu = usage.get("cpu").and_then(|q| parse_cpu_to_nanocores(q)).unwrap_or(0);
    let memory = usage.get("memory").and_then(|q| parse_memory_to_bytes(q)).unwrap_or(0);
    ResourceUsage::new(cpu, memory)
}

fn node_samples(items: Vec<NodeMetricsItem>) -> Vec<NodeUsageSample> {
    items
        .into_iter()
        .filter(|item| !item.metadata.name.is_empty())
        .map(|item| NodeUsageSample {
            usage: usage_from_map(&item.usage),
            name: item.metadata.name,
        })
        .collect()
}

fn pod_samples(items: Vec<PodMetricsItem>) -> Vec<PodUsageSample> {
    items
        .into_iter()
        .filter(|item| !item.metadata.name.is_empty())
        .map(|item| PodUsageSample {
            namespace: item.metadata.namespace,
            name: item.metadata.name,
            containers: item
                .containers
                .into_iter()
                .map(|c| ContainerUsageSample {
                    usage: usage_from_map(&c.usage),
                    name: c.name,
                })
                .collect(),
        })
        .collect()
}

#[async_trait]
impl MetricsApi for MetricsServerClient {
    async fn node_usage(&self) -> Result<Vec<NodeUsageSample>> {
        Ok(node_samples(self.get(NODES_PATH).await?))
    }

    async fn pod_usage(&self) -> Result<Vec<PodUsageSample>> {
        Ok(pod_samples(self.get(PODS_PATH).await?))
    }
}
