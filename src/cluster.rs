//! Cluster identity and node-group topology attached to outgoing batches.

use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::Result;
use crate::kubernetes::ClusterApi;

/// Node labels naming the pool a node belongs to, in lookup order.
const NODE_GROUP_LABELS: &[&str] = &[
    "eks.amazonaws.com/nodegroup",
    "cloud.google.com/gke-nodepool",
    "agentpool",
    "node-pool",
];

const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
const BETA_INSTANCE_TYPE_LABEL: &str = "beta.kubernetes.io/instance-type";

/// Locally configured identity of the cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterIdentity {
    pub name: String,
    pub provider: String,
    pub region: String,
    pub zone: String,
    pub labels: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeGroupInfo {
    pub name: String,
    /// Labels carried with the same value by every member.
    pub labels: BTreeMap<String, String>,
    pub platform: PlatformInfo,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterContext {
    pub name: String,
    pub kubernetes_version: String,
    pub provider: ProviderInfo,
    pub labels: BTreeMap<String, String>,
    pub node_groups: Vec<NodeGroupInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

pub fn node_group_name(labels: &BTreeMap<String, String>) -> Option<&str> {
    NODE_GROUP_LABELS
        .iter()
        .find_map(|key| labels.get(*key))
        .map(String::as_str)
}

/// Keeps only entries present in both maps with equal values.
pub fn intersect_labels(current: &mut BTreeMap<String, String>, other: &BTreeMap<String, String>) {
    current.retain(|k, v| other.get(k) == Some(v));
}

fn provider_metadata(provider: &str, labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let keys: &[(&str, &str)] = match provider.to_ascii_lowercase().as_str() {
        "aws" => &[(INSTANCE_TYPE_LABEL, "instance_type"), (ZONE_LABEL, "availability_zone")],
        "gcp" => &[(BETA_INSTANCE_TYPE_LABEL, "machine_type"), (ZONE_LABEL, "zone")],
        "azure" => &[(INSTANCE_TYPE_LABEL, "vm_size"), (ZONE_LABEL, "zone")],
        _ => &[],
    };
    keys.iter()
        .filter_map(|(label, field)| labels.get(*label).map(|v| (field.to_string(), v.clone())))
        .collect()
}

/// Groups nodes by pool. Nodes without a pool label are skipped; groups are
/// ordered by name and take platform data from their first member.
pub fn build_node_groups(nodes: &[Node], provider: &str) -> Vec<NodeGroupInfo> {
    let mut groups: BTreeMap<String, NodeGroupInfo> = BTreeMap::new();
    let empty = BTreeMap::new();

    for node in nodes {
        let labels = node.metadata.labels.as_ref().unwrap_or(&empty);
        let Some(group) = node_group_name(labels) else {
            continue;
        };

        match groups.get_mut(group) {
            Some(existing) => intersect_labels(&mut existing.labels, labels),
            None => {
                let info = node.status.as_ref().and_then(|s| s.node_info.as_ref());
                groups.insert(
                    group.to_string(),
                    NodeGroupInfo {
                        name: group.to_string(),
                        labels: labels.clone(),
                        platform: PlatformInfo {
                            os: info.map(|i| i.operating_system.clone()).unwrap_or_default(),
                            architecture: info.map(|i| i.architecture.clone()).unwrap_or_default(),
                            version: info.map(|i| i.kubelet_version.clone()).unwrap_or_default(),
                        },
                        metadata: provider_metadata(provider, labels),
                    },
                );
            }
        }
    }

    groups.into_values().collect()
}

/// Resolves the cluster context once per cycle.
pub struct ContextProvider {
    identity: ClusterIdentity,
}

impl ContextProvider {
    pub fn new(identity: ClusterIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    pub async fn resolve(&self, api: &dyn ClusterApi) -> Result<ClusterContext> {
        let kubernetes_version = api.server_version().await?;
        let nodes = api.list_nodes().await?;
        let node_groups = build_node_groups(&nodes, &self.identity.provider);
        debug!(
            version = %kubernetes_version,
            node_groups = node_groups.len(),
            "Resolved cluster context"
        );

        Ok(ClusterContext {
            name: self.identity.name.clone(),
            kubernetes_version,
            provider: ProviderInfo {
                name: self.identity.provider.clone(),
                region: self.identity.region.clone(),
                zone: self.identity.zone.clone(),
            },
            labels: self.identity.labels.clone(),
            node_groups,
            metadata: self.identity.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::MockClusterApi;
    use k8s_openapi::api::core::v1::{NodeStatus, NodeSystemInfo};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(name: &str, labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                node_info: Some(NodeSystemInfo {
                    operating_system: "linux".to_string(),
                    architecture: "amd64".to_string(),
                    kubelet_version: "v1.26.3".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_group_labels_are_intersection() {
        let nodes = vec![
            node("a", &[("agentpool", "pool1"), ("tier", "web"), ("zone", "1")]),
            node("b", &[("agentpool", "pool1"), ("tier", "web"), ("zone", "2")]),
            node("c", &[("agentpool", "pool1"), ("tier", "web")]),
        ];
        let groups = build_node_groups(&nodes, "azure");

        assert_eq!(groups.len(), 1);
        let labels = &groups[0].labels;
        assert_eq!(labels.get("tier").map(String::as_str), Some("web"));
        assert_eq!(labels.get("agentpool").map(String::as_str), Some("pool1"));
        assert!(!labels.contains_key("zone"));
        assert_eq!(groups[0].platform.os, "linux");
    }

    #[test]
    fn test_nodes_without_group_are_skipped() {
        let nodes = vec![
            node("x", &[("kubernetes.io/os", "linux")]),
            node("y", &[("eks.amazonaws.com/nodegroup", "ng-2")]),
            node("z", &[("cloud.google.com/gke-nodepool", "ng-1")]),
        ];
        let groups = build_node_groups(&nodes, "");
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["ng-1", "ng-2"]);
    }

    #[test]
    fn test_provider_metadata() {
        let nodes = vec![node(
            "a",
            &[
                ("eks.amazonaws.com/nodegroup", "ng"),
                (INSTANCE_TYPE_LABEL, "m5.large"),
                (ZONE_LABEL, "eu-west-1a"),
            ],
        )];
        let groups = build_node_groups(&nodes, "AWS");
        assert_eq!(groups[0].metadata.get("instance_type").map(String::as_str), Some("m5.large"));
        assert_eq!(groups[0].metadata.get("availability_zone").map(String::as_str), Some("eu-west-1a"));
    }

    #[tokio::test]
    async fn test_resolve_context() {
        let mut api = MockClusterApi::new();
        api.nodes = vec![node("a", &[("node-pool", "default")])];
        let identity = ClusterIdentity {
            name: "prod".to_string(),
            provider: "gcp".to_string(),
            region: "europe-west1".to_string(),
            ..Default::default()
        };

        let ctx = ContextProvider::new(identity).resolve(&api).await.unwrap();
        assert_eq!(ctx.name, "prod");
        assert_eq!(ctx.kubernetes_version, "v1.26.0");
        assert_eq!(ctx.provider.region, "europe-west1");
        assert_eq!(ctx.node_groups.len(), 1);

        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("kubernetes_version").is_some());
        assert!(json.get("node_groups").is_some());
    }

    #[tokio::test]
    async fn test_resolve_fails_without_version() {
        let api = MockClusterApi::new().failing("version");
        let provider = ContextProvider::new(ClusterIdentity::default());
        assert!(provider.resolve(&api).await.is_err());
    }
}
