use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::cost::CostModel;
use crate::error::{Error, Result};
use crate::filter::included;
use crate::kubernetes::ClusterApi;
use crate::parsing::parse_memory_to_bytes;
use crate::types::{ResourceKind, ResourceMetrics, StorageMetrics};

pub struct VolumeCollector {
    api: Arc<dyn ClusterApi>,
    config: CollectorConfig,
    cost: CostModel,
}

impl VolumeCollector {
    pub fn new(api: Arc<dyn ClusterApi>, config: CollectorConfig, cost: CostModel) -> Self {
        Self { api, config, cost }
    }
}

#[async_trait]
impl Collector for VolumeCollector {
    fn name(&self) -> &'static str {
        "pv-collector"
    }

    fn description(&self) -> &'static str {
        "Collects metrics for Kubernetes PersistentVolumes"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let volumes = self
            .api
            .list_persistent_volumes()
            .await
            .map_err(|e| Error::list(ResourceKind::PersistentVolume, e))?;
        let claims = self
            .api
            .list_persistent_volume_claims()
            .await
            .map_err(|e| Error::list(ResourceKind::PersistentVolume, e))?;
        let claims = claim_index(&claims);

        let records: Vec<_> = volumes
            .iter()
            .map(|pv| build_volume_record(pv, &claims, &self.config, &self.cost))
            // unbound volumes carry no namespace and are always kept
            .filter(|r| r.namespace.as_deref().map_or(true, |ns| included(ns, &self.config)))
            .collect();
        debug!(collector = self.name(), count = records.len(), "Collected persistent volumes");
        Ok(records)
    }
}

/// Existing claims as (namespace, name).
pub fn claim_index(claims: &[PersistentVolumeClaim]) -> HashSet<(String, String)> {
    claims
        .iter()
        .filter_map(|c| Some((c.metadata.namespace.clone()?, c.metadata.name.clone()?)))
        .collect()
}

pub fn build_volume_record(
    pv: &PersistentVolume,
    claims: &HashSet<(String, String)>,
    config: &CollectorConfig,
    cost: &CostModel,
) -> ResourceMetrics {
    let spec = pv.spec.as_ref();
    let capacity = spec
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get("storage"))
        .and_then(|q| parse_memory_to_bytes(&q.0))
        .unwrap_or(0)
        .max(0);

    let mut storage = StorageMetrics {
        capacity_bytes: capacity,
        ..Default::default()
    };
    match pv.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Bound") => storage.usage_bytes = capacity,
        Some("Available") => storage.available = capacity,
        _ => {}
    }

    // A claim reference only counts once the claim itself exists.
    let mut namespace = None;
    if let Some(claim_ref) = spec.and_then(|s| s.claim_ref.as_ref()) {
        if let (Some(ns), Some(name)) = (&claim_ref.namespace, &claim_ref.name) {
            if claims.contains(&(ns.clone(), name.clone())) {
                namespace = Some(ns.clone());
                storage.pvc_name = Some(name.clone());
            }
        }
    }

    let storage_class = spec.and_then(|s| s.storage_class_name.as_deref());
    let block_mode = spec.and_then(|s| s.volume_mode.as_deref()) == Some("Block");

    let mut record = ResourceMetrics::new(
        ResourceKind::PersistentVolume,
        pv.metadata.name.clone().unwrap_or_default(),
        namespace,
        record_labels(pv.metadata.labels.as_ref(), config),
    );
    record.cost = cost.volume_cost(capacity, storage_class, block_mode);
    record.storage = storage;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::MockClusterApi;
    use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeSpec, PersistentVolumeStatus};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const GIB: i64 = 1 << 30;

    fn pv(name: &str, phase: &str, class: &str, claim: Option<(&str, &str)>) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                capacity: Some([("storage".to_string(), Quantity("10Gi".to_string()))].into_iter().collect()),
                storage_class_name: Some(class.to_string()),
                claim_ref: claim.map(|(ns, n)| ObjectReference {
                    namespace: Some(ns.to_string()),
                    name: Some(n.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    fn pvc(namespace: &str, name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_bound_premium_volume() {
        let record = build_volume_record(
            &pv("pv-1", "Bound", "premium-ssd", None),
            &HashSet::new(),
            &CollectorConfig::default(),
            &CostModel::default(),
        );
        assert_eq!(record.storage.capacity_bytes, 10 * GIB);
        assert_eq!(record.storage.usage_bytes, record.storage.capacity_bytes);
        assert!((record.cost.storage_cost - 1.7).abs() < 1e-9);
        assert_eq!(record.cost.total_cost(), record.cost.storage_cost);
    }

    #[test]
    fn test_available_volume() {
        let record = build_volume_record(
            &pv("pv-2", "Available", "standard", None),
            &HashSet::new(),
            &CollectorConfig::default(),
            &CostModel::default(),
        );
        assert_eq!(record.storage.usage_bytes, 0);
        assert_eq!(record.storage.available, 10 * GIB);
    }

    #[test]
    fn test_block_mode_multiplier() {
        let mut volume = pv("pv-3", "Bound", "standard-ssd", None);
        if let Some(spec) = volume.spec.as_mut() {
            spec.volume_mode = Some("Block".to_string());
        }
        let record = build_volume_record(&volume, &HashSet::new(), &CollectorConfig::default(), &CostModel::default());
        assert!((record.cost.storage_cost - 10.0 * 0.08 * 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_claim_namespace_drives_filter() {
        let mut api = MockClusterApi::new();
        api.persistent_volumes = vec![
            pv("pv-a", "Bound", "premium-ssd", Some(("default", "data"))),
            pv("pv-b", "Bound", "premium-ssd", Some(("kube-system", "etcd"))),
            pv("pv-c", "Available", "premium-ssd", None),
        ];
        api.persistent_volume_claims = vec![pvc("default", "data"), pvc("kube-system", "etcd")];
        let config = CollectorConfig {
            exclude_namespaces: vec!["kube-system".to_string()],
            ..Default::default()
        };

        let collector = VolumeCollector::new(Arc::new(api), config, CostModel::default());
        let records = collector.collect().await.unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["pv-a", "pv-c"]);
        assert_eq!(records[0].namespace.as_deref(), Some("default"));
        assert_eq!(records[0].storage.pvc_name.as_deref(), Some("data"));
    }

    #[tokio::test]
    async fn test_claim_list_failure_aborts() {
        let api = MockClusterApi::new().failing("persistentvolumeclaims");
        let collector = VolumeCollector::new(Arc::new(api), CollectorConfig::default(), CostModel::default());
        assert!(collector.collect().await.is_err());
    }
}
