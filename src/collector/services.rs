use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::cost::CostModel;
use crate::error::{Error, Result};
use crate::filter::included;
use crate::kubernetes::ClusterApi;
use crate::types::{NetworkMetrics, ResourceKind, ResourceMetrics};

pub struct ServiceCollector {
    api: Arc<dyn ClusterApi>,
    config: CollectorConfig,
    cost: CostModel,
}

impl ServiceCollector {
    pub fn new(api: Arc<dyn ClusterApi>, config: CollectorConfig, cost: CostModel) -> Self {
        Self { api, config, cost }
    }
}

#[async_trait]
impl Collector for ServiceCollector {
    fn name(&self) -> &'static str {
        "service-collector"
    }

    fn description(&self) -> &'static str {
        "Collects metrics for Kubernetes Services"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let services = self
            .api
            .list_services()
            .await
            .map_err(|e| Error::list(ResourceKind::Service, e))?;
        let endpoints = self
            .api
            .list_endpoints()
            .await
            .map_err(|e| Error::list(ResourceKind::Service, e))?;

        let by_key: HashMap<(&str, &str), &Endpoints> = endpoints
            .iter()
            .filter_map(|ep| Some(((ep.metadata.namespace.as_deref()?, ep.metadata.name.as_deref()?), ep)))
            .collect();

        let mut records = Vec::new();
        for svc in &services {
            let namespace = svc.metadata.namespace.as_deref().unwrap_or_default();
            if !included(namespace, &self.config) {
                continue;
            }
            let name = svc.metadata.name.as_deref().unwrap_or_default();
            let endpoints = by_key.get(&(namespace, name)).copied();
            records.push(build_service_record(svc, endpoints, &self.config, &self.cost));
        }
        debug!(collector = self.name(), count = records.len(), "Collected services");
        Ok(records)
    }
}

fn load_balancer_ingress_count(svc: &Service) -> usize {
    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map_or(0, Vec::len)
}

/// Ready addresses count as sent packets, not-ready ones as send errors, and
/// an external load-balancer address marks inbound reachability.
fn service_network(svc: &Service, endpoints: Option<&Endpoints>) -> NetworkMetrics {
    let mut network = NetworkMetrics::default();
    let subsets = endpoints.and_then(|ep| ep.subsets.as_ref());
    for subset in subsets.into_iter().flatten() {
        network.tx_packets += subset.addresses.as_ref().map_or(0, Vec::len) as i64;
        network.tx_errors += subset.not_ready_addresses.as_ref().map_or(0, Vec::len) as i64;
    }
    if load_balancer_ingress_count(svc) > 0 {
        network.rx_packets += 1;
    }
    network
}

pub fn build_service_record(
    svc: &Service,
    endpoints: Option<&Endpoints>,
    config: &CollectorConfig,
    cost: &CostModel,
) -> ResourceMetrics {
    let mut record = ResourceMetrics::new(
        ResourceKind::Service,
        svc.metadata.name.clone().unwrap_or_default(),
        svc.metadata.namespace.clone(),
        record_labels(svc.metadata.labels.as_ref(), config),
    );

    let spec = svc.spec.as_ref();
    let service_type = spec.and_then(|s| s.type_.as_deref()).unwrap_or("ClusterIP");
    let client_ip_affinity = spec.and_then(|s| s.session_affinity.as_deref()) == Some("ClientIP");

    record.network = service_network(svc, endpoints);
    record.cost = cost.service_cost(service_type, load_balancer_ingress_count(svc), client_ip_affinity);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::MockClusterApi;
    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointSubset, LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    fn service(namespace: &str, name: &str, type_: &str, affinity: &str, lb_ips: &[&str]) -> Service {
        Service {
            metadata: meta(namespace, name),
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                session_affinity: Some(affinity.to_string()),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(
                        lb_ips
                            .iter()
                            .map(|ip| LoadBalancerIngress {
                                ip: Some(ip.to_string()),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                }),
                ..Default::default()
            }),
        }
    }

    fn address(ip: &str) -> EndpointAddress {
        EndpointAddress {
            ip: ip.to_string(),
            ..Default::default()
        }
    }

    fn endpoints(namespace: &str, name: &str, ready: usize, not_ready: usize) -> Endpoints {
        Endpoints {
            metadata: meta(namespace, name),
            subsets: Some(vec![EndpointSubset {
                addresses: Some((0..ready).map(|i| address(&format!("10.0.0.{}", i))).collect()),
                not_ready_addresses: Some((0..not_ready).map(|i| address(&format!("10.0.1.{}", i))).collect()),
                ..Default::default()
            }]),
        }
    }

    #[test]
    fn test_load_balancer_service() {
        let svc = service("default", "web", "LoadBalancer", "None", &["1.2.3.4", "5.6.7.8"]);
        let ep = endpoints("default", "web", 3, 1);
        let record = build_service_record(&svc, Some(&ep), &CollectorConfig::default(), &CostModel::default());

        assert_eq!(record.network.tx_packets, 3);
        assert_eq!(record.network.tx_errors, 1);
        assert_eq!(record.network.rx_packets, 1);
        assert!((record.cost.network_cost - 0.05).abs() < 1e-12);
        assert_eq!(record.cost.total_cost(), record.cost.network_cost);
    }

    #[test]
    fn test_node_port_with_affinity() {
        let svc = service("default", "api", "NodePort", "ClientIP", &[]);
        let record = build_service_record(&svc, None, &CollectorConfig::default(), &CostModel::default());
        assert!((record.cost.network_cost - 0.011).abs() < 1e-12);
        assert_eq!(record.network, NetworkMetrics::default());
    }

    #[tokio::test]
    async fn test_collect_joins_endpoints() {
        let mut api = MockClusterApi::new();
        api.services = vec![
            service("default", "web", "ClusterIP", "None", &[]),
            service("kube-system", "dns", "ClusterIP", "None", &[]),
        ];
        api.endpoints = vec![endpoints("default", "web", 2, 0), endpoints("other", "web", 9, 9)];
        let config = CollectorConfig {
            exclude_namespaces: vec!["kube-system".to_string()],
            ..Default::default()
        };

        let collector = ServiceCollector::new(Arc::new(api), config, CostModel::default());
        let records = collector.collect().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].network.tx_packets, 2);
        assert_eq!(records[0].cost.total_cost(), 0.0);
    }
}
