use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::filter::included;
use crate::kubernetes::ClusterApi;
use crate::parsing::format_age;
use crate::types::{NamespaceStatus, ResourceKind, ResourceMetrics, ResourceStatus};

/// Namespaces are filtered on their own name.
pub struct NamespaceCollector {
    api: Arc<dyn ClusterApi>,
    config: CollectorConfig,
}

impl NamespaceCollector {
    pub fn new(api: Arc<dyn ClusterApi>, config: CollectorConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl Collector for NamespaceCollector {
    fn name(&self) -> &'static str {
        "namespace-collector"
    }

    fn description(&self) -> &'static str {
        "Collects metrics for Kubernetes Namespaces"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let namespaces = self
            .api
            .list_namespaces()
            .await
            .map_err(|e| Error::list(ResourceKind::Namespace, e))?;

        let now = Utc::now();
        let records: Vec<_> = namespaces
            .iter()
            .filter(|ns| included(ns.metadata.name.as_deref().unwrap_or_default(), &self.config))
            .map(|ns| build_namespace_record(ns, now, &self.config))
            .collect();
        debug!(collector = self.name(), count = records.len(), "Collected namespaces");
        Ok(records)
    }
}

pub fn build_namespace_record(ns: &Namespace, now: DateTime<Utc>, config: &CollectorConfig) -> ResourceMetrics {
    let age_secs = ns
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| (now - t.0).num_seconds())
        .unwrap_or(0);

    let status = NamespaceStatus {
        phase: ns.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_default(),
        age: format_age(age_secs),
        finalizers: ns.spec.as_ref().and_then(|s| s.finalizers.clone()).unwrap_or_default(),
    };

    ResourceMetrics::new(
        ResourceKind::Namespace,
        ns.metadata.name.clone().unwrap_or_default(),
        None,
        record_labels(ns.metadata.labels.as_ref(), config),
    )
    .with_status(ResourceStatus::Namespace(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::MockClusterApi;
    use chrono::Duration;
    use k8s_openapi::api::core::v1::{NamespaceSpec, NamespaceStatus as K8sNamespaceStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn namespace(name: &str, created: DateTime<Utc>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            spec: Some(NamespaceSpec {
                finalizers: Some(vec!["kubernetes".to_string()]),
            }),
            status: Some(K8sNamespaceStatus {
                phase: Some("Active".to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_namespace_status() {
        let now = Utc::now();
        let record = build_namespace_record(&namespace("team-a", now - Duration::hours(26)), now, &CollectorConfig::default());

        assert_eq!(record.kind, ResourceKind::Namespace);
        assert!(record.namespace.is_none());
        assert_eq!(record.cost.total_cost(), 0.0);
        match record.status {
            Some(ResourceStatus::Namespace(status)) => {
                assert_eq!(status.phase, "Active");
                assert_eq!(status.age, "26h0m0s");
                assert_eq!(status.finalizers, vec!["kubernetes"]);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_filter_on_namespace_name() {
        let now = Utc::now();
        let mut api = MockClusterApi::new();
        api.namespaces = vec![namespace("default", now), namespace("kube-system", now), namespace("team-a", now)];
        let config = CollectorConfig {
            include_namespaces: vec!["default".to_string(), "kube-system".to_string()],
            exclude_namespaces: vec!["kube-system".to_string()],
            ..Default::default()
        };

        let records = NamespaceCollector::new(Arc::new(api), config).collect().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "default");
    }
}
