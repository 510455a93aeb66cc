use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as apps;
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::filter::included;
use crate::kubernetes::ClusterApi;
use crate::types::{
    DaemonSetStatus, DeploymentStatus, ResourceKind, ResourceMetrics, ResourceStatus, StatefulSetStatus,
    WorkloadCondition,
};

/// Status-only records for Deployments, StatefulSets and DaemonSets.
pub struct WorkloadCollector {
    api: Arc<dyn ClusterApi>,
    config: CollectorConfig,
}

impl WorkloadCollector {
    pub fn new(api: Arc<dyn ClusterApi>, config: CollectorConfig) -> Self {
        Self { api, config }
    }

    fn admits(&self, namespace: Option<&str>) -> bool {
        included(namespace.unwrap_or_default(), &self.config)
    }
}

#[async_trait]
impl Collector for WorkloadCollector {
    fn name(&self) -> &'static str {
        "workload-collector"
    }

    fn description(&self) -> &'static str {
        "Collects metrics for Kubernetes workloads (Deployments, StatefulSets, DaemonSets)"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let deployments = self
            .api
            .list_deployments()
            .await
            .map_err(|e| Error::list(ResourceKind::Deployment, e))?;
        let stateful_sets = self
            .api
            .list_stateful_sets()
            .await
            .map_err(|e| Error::list(ResourceKind::StatefulSet, e))?;
        let daemon_sets = self
            .api
            .list_daemon_sets()
            .await
            .map_err(|e| Error::list(ResourceKind::DaemonSet, e))?;

        let mut records = Vec::new();
        records.extend(
            deployments
                .iter()
                .filter(|d| self.admits(d.metadata.namespace.as_deref()))
                .map(|d| build_deployment_record(d, &self.config)),
        );
        records.extend(
            stateful_sets
                .iter()
                .filter(|s| self.admits(s.metadata.namespace.as_deref()))
                .map(|s| build_stateful_set_record(s, &self.config)),
        );
        records.extend(
            daemon_sets
                .iter()
                .filter(|d| self.admits(d.metadata.namespace.as_deref()))
                .map(|d| build_daemon_set_record(d, &self.config)),
        );
        debug!(collector = self.name(), count = records.len(), "Collected workloads");
        Ok(records)
    }
}

fn condition(type_: &str, status: &str, reason: &Option<String>, message: &Option<String>) -> WorkloadCondition {
    WorkloadCondition {
        condition_type: type_.to_string(),
        status: status.to_string(),
        reason: reason.clone(),
        message: message.clone(),
    }
}

pub fn build_deployment_record(deploy: &apps::Deployment, config: &CollectorConfig) -> ResourceMetrics {
    let spec = deploy.spec.as_ref();
    let st = deploy.status.as_ref();
    let status = DeploymentStatus {
        replicas: st.and_then(|s| s.replicas).unwrap_or(0),
        available_replicas: st.and_then(|s| s.available_replicas).unwrap_or(0),
        updated_replicas: st.and_then(|s| s.updated_replicas).unwrap_or(0),
        ready_replicas: st.and_then(|s| s.ready_replicas).unwrap_or(0),
        observed_generation: st.and_then(|s| s.observed_generation),
        conditions: st
            .and_then(|s| s.conditions.as_ref())
            .map(|cs| {
                cs.iter()
                    .map(|c| condition(&c.type_, &c.status, &c.reason, &c.message))
                    .collect()
            })
            .unwrap_or_default(),
        collision_count: st.and_then(|s| s.collision_count),
        strategy: spec.and_then(|s| s.strategy.as_ref()).and_then(|s| s.type_.clone()),
        min_ready_seconds: spec.and_then(|s| s.min_ready_seconds),
        revision_history_limit: spec.and_then(|s| s.revision_history_limit),
    };

    ResourceMetrics::new(
        ResourceKind::Deployment,
        deploy.metadata.name.clone().unwrap_or_default(),
        deploy.metadata.namespace.clone(),
        record_labels(deploy.metadata.labels.as_ref(), config),
    )
    .with_status(ResourceStatus::Deployment(status))
}

pub fn build_stateful_set_record(sts: &apps::StatefulSet, config: &CollectorConfig) -> ResourceMetrics {
    let spec = sts.spec.as_ref();
    let st = sts.status.as_ref();
    let status = StatefulSetStatus {
        replicas: st.map(|s| s.replicas).unwrap_or(0),
        ready_replicas: st.and_then(|s| s.ready_replicas).unwrap_or(0),
        current_replicas: st.and_then(|s| s.current_replicas).unwrap_or(0),
        updated_replicas: st.and_then(|s| s.updated_replicas).unwrap_or(0),
        observed_generation: st.and_then(|s| s.observed_generation),
        conditions: st
            .and_then(|s| s.conditions.as_ref())
            .map(|cs| {
                cs.iter()
                    .map(|c| condition(&c.type_, &c.status, &c.reason, &c.message))
                    .collect()
            })
            .unwrap_or_default(),
        update_strategy: spec.and_then(|s| s.update_strategy.as_ref()).and_then(|s| s.type_.clone()),
        service_name: spec.map(|s| s.service_name.clone()).unwrap_or_default(),
    };

    ResourceMetrics::new(
        ResourceKind::StatefulSet,
        sts.metadata.name.clone().unwrap_or_default(),
        sts.metadata.namespace.clone(),
        record_labels(sts.metadata.labels.as_ref(), config),
    )
    .with_status(ResourceStatus::StatefulSet(status))
}

pub fn build_daemon_set_record(ds: &apps::DaemonSet, config: &CollectorConfig) -> ResourceMetrics {
    let spec = ds.spec.as_ref();
    let st = ds.status.as_ref();
    let status = DaemonSetStatus {
        desired_number_scheduled: st.map(|s| s.desired_number_scheduled).unwrap_or(0),
        current_number_scheduled: st.map(|s| s.current_number_scheduled).unwrap_or(0),
        number_ready: st.map(|s| s.number_ready).unwrap_or(0),
        updated_number_scheduled: st.and_then(|s| s.updated_number_scheduled).unwrap_or(0),
        number_available: st.and_then(|s| s.number_available).unwrap_or(0),
        number_unavailable: st.and_then(|s| s.number_unavailable).unwrap_or(0),
        observed_generation: st.and_then(|s| s.observed_generation),
        conditions: st
            .and_then(|s| s.conditions.as_ref())
            .map(|cs| {
                cs.iter()
                    .map(|c| condition(&c.type_, &c.status, &c.reason, &c.message))
                    .collect()
            })
            .unwrap_or_default(),
        update_strategy: spec.and_then(|s| s.update_strategy.as_ref()).and_then(|s| s.type_.clone()),
    };

    ResourceMetrics::new(
        ResourceKind::DaemonSet,
        ds.metadata.name.clone().unwrap_or_default(),
        ds.metadata.namespace.clone(),
        record_labels(ds.metadata.labels.as_ref(), config),
    )
    .with_status(ResourceStatus::DaemonSet(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::MockClusterApi;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    fn deployment(namespace: &str, name: &str) -> apps::Deployment {
        apps::Deployment {
            metadata: meta(namespace, name),
            spec: Some(apps::DeploymentSpec {
                strategy: Some(apps::DeploymentStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    ..Default::default()
                }),
                revision_history_limit: Some(10),
                ..Default::default()
            }),
            status: Some(apps::DeploymentStatus {
                replicas: Some(3),
                ready_replicas: Some(2),
                available_replicas: Some(2),
                updated_replicas: Some(3),
                observed_generation: Some(7),
                conditions: Some(vec![apps::DeploymentCondition {
                    type_: "Available".to_string(),
                    status: "True".to_string(),
                    reason: Some("MinimumReplicasAvailable".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_deployment_status() {
        let record = build_deployment_record(&deployment("default", "web"), &CollectorConfig::default());
        assert_eq!(record.kind, ResourceKind::Deployment);
        match record.status {
            Some(ResourceStatus::Deployment(s)) => {
                assert_eq!(s.replicas, 3);
                assert_eq!(s.ready_replicas, 2);
                assert_eq!(s.strategy.as_deref(), Some("RollingUpdate"));
                assert_eq!(s.conditions[0].condition_type, "Available");
                assert_eq!(s.observed_generation, Some(7));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_stateful_set_and_daemon_set_status() {
        let sts = apps::StatefulSet {
            metadata: meta("db", "postgres"),
            spec: Some(apps::StatefulSetSpec {
                service_name: "postgres".to_string(),
                ..Default::default()
            }),
            status: Some(apps::StatefulSetStatus {
                replicas: 2,
                ready_replicas: Some(1),
                ..Default::default()
            }),
        };
        let record = build_stateful_set_record(&sts, &CollectorConfig::default());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "StatefulSet");
        assert_eq!(value["status"]["serviceName"], "postgres");
        assert_eq!(value["status"]["readyReplicas"], 1);

        let ds = apps::DaemonSet {
            metadata: meta("monitoring", "node-exporter"),
            status: Some(apps::DaemonSetStatus {
                desired_number_scheduled: 3,
                number_ready: 3,
                number_unavailable: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let record = build_daemon_set_record(&ds, &CollectorConfig::default());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"]["desiredNumberScheduled"], 3);
        assert_eq!(value["status"]["numberReady"], 3);
    }

    #[tokio::test]
    async fn test_collect_all_workload_kinds() {
        let mut api = MockClusterApi::new();
        api.deployments = vec![deployment("default", "web"), deployment("kube-system", "coredns")];
        api.daemon_sets = vec![apps::DaemonSet {
            metadata: meta("default", "agent"),
            ..Default::default()
        }];
        let config = CollectorConfig {
            exclude_namespaces: vec!["kube-system".to_string()],
            ..Default::default()
        };

        let records = WorkloadCollector::new(Arc::new(api), config).collect().await.unwrap();
        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::Deployment, ResourceKind::DaemonSet]);
        assert!(records.iter().all(|r| r.cost.total_cost() == 0.0));
    }

    #[tokio::test]
    async fn test_stateful_set_list_failure() {
        let api = MockClusterApi::new().failing("statefulsets");
        let err = WorkloadCollector::new(Arc::new(api), CollectorConfig::default())
            .collect()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::List { kind: ResourceKind::StatefulSet, .. }));
    }
}
