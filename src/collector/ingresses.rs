use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use std::sync::Arc;
use tracing::debug;

use super::{record_labels, Collector};
use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::filter::included;
use crate::kubernetes::ClusterApi;
use crate::types::{
    BackendPort, IngressBackendSummary, IngressPathSummary, IngressRuleSummary, IngressStatus, IngressTlsSummary,
    ResourceKind, ResourceMetrics, ResourceStatus, ServiceBackend,
};

pub struct IngressCollector {
    api: Arc<dyn ClusterApi>,
    config: CollectorConfig,
}

impl IngressCollector {
    pub fn new(api: Arc<dyn ClusterApi>, config: CollectorConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl Collector for IngressCollector {
    fn name(&self) -> &'static str {
        "ingress-collector"
    }

    fn description(&self) -> &'static str {
        "Collects metrics for Kubernetes Ingresses"
    }

    async fn collect(&self) -> Result<Vec<ResourceMetrics>> {
        let ingresses = self
            .api
            .list_ingresses()
            .await
            .map_err(|e| Error::list(ResourceKind::Ingress, e))?;

        let records: Vec<_> = ingresses
            .iter()
            .filter(|ing| included(ing.metadata.namespace.as_deref().unwrap_or_default(), &self.config))
            .map(|ing| build_ingress_record(ing, &self.config))
            .collect();
        debug!(collector = self.name(), count = records.len(), "Collected ingresses");
        Ok(records)
    }
}

fn backend_summary(backend: &IngressBackend) -> IngressBackendSummary {
    IngressBackendSummary {
        service: backend.service.as_ref().map(|svc| ServiceBackend {
            name: svc.name.clone(),
            port: svc
                .port
                .as_ref()
                .map(|p| BackendPort {
                    name: p.name.clone(),
                    number: p.number,
                })
                .unwrap_or_default(),
        }),
        resource: backend.resource.as_ref().map(|r| format!("{}/{}", r.kind, r.name)),
    }
}

pub fn ingress_status(ing: &Ingress) -> IngressStatus {
    let spec = ing.spec.as_ref();

    let rules = spec
        .and_then(|s| s.rules.as_ref())
        .into_iter()
        .flatten()
        .map(|rule| IngressRuleSummary {
            host: rule.host.clone().unwrap_or_default(),
            paths: rule
                .http
                .as_ref()
                .map(|http| {
                    http.paths
                        .iter()
                        .map(|p| IngressPathSummary {
                            path: p.path.clone().unwrap_or_default(),
                            path_type: p.path_type.clone(),
                            backend: backend_summary(&p.backend),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    let tls = spec
        .and_then(|s| s.tls.as_ref())
        .into_iter()
        .flatten()
        .map(|t| IngressTlsSummary {
            hosts: t.hosts.clone().unwrap_or_default(),
            secret_name: t.secret_name.clone(),
        })
        .collect();

    let load_balancer = ing
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
        .collect();

    IngressStatus {
        load_balancer,
        class: spec.and_then(|s| s.ingress_class_name.clone()),
        rules,
        tls,
    }
}

pub fn build_ingress_record(ing: &Ingress, config: &CollectorConfig) -> ResourceMetrics {
    ResourceMetrics::new(
        ResourceKind::Ingress,
        ing.metadata.name.clone().unwrap_or_default(),
        ing.metadata.namespace.clone(),
        record_labels(ing.metadata.labels.as_ref(), config),
    )
    .with_status(ResourceStatus::Ingress(ingress_status(ing)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::MockClusterApi;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressRule,
        IngressServiceBackend, IngressSpec, IngressStatus as K8sIngressStatus, IngressTLS, ServiceBackendPort,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn ingress(namespace: &str, name: &str) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: Some("nginx".to_string()),
                rules: Some(vec![IngressRule {
                    host: Some("shop.example.com".to_string()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: "web".to_string(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(80),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                tls: Some(vec![IngressTLS {
                    hosts: Some(vec!["shop.example.com".to_string()]),
                    secret_name: Some("shop-tls".to_string()),
                }]),
                ..Default::default()
            }),
            status: Some(K8sIngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus {
                    ingress: Some(vec![IngressLoadBalancerIngress {
                        hostname: Some("lb.example.com".to_string()),
                        ..Default::default()
                    }]),
                }),
            }),
        }
    }

    #[test]
    fn test_ingress_summary() {
        let status = ingress_status(&ingress("default", "shop"));
        assert_eq!(status.class.as_deref(), Some("nginx"));
        assert_eq!(status.load_balancer, vec!["lb.example.com"]);
        assert_eq!(status.rules[0].host, "shop.example.com");

        let backend = status.rules[0].paths[0].backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "web");
        assert_eq!(backend.port.number, Some(80));
        assert_eq!(status.tls[0].secret_name.as_deref(), Some("shop-tls"));
    }

    #[test]
    fn test_ingress_wire_shape() {
        let record = build_ingress_record(&ingress("default", "shop"), &CollectorConfig::default());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"]["rules"][0]["paths"][0]["pathType"], "Prefix");
        assert_eq!(value["status"]["tls"][0]["secretName"], "shop-tls");
        assert_eq!(value["status"]["loadBalancer"][0], "lb.example.com");
    }

    #[tokio::test]
    async fn test_collect_filters() {
        let mut api = MockClusterApi::new();
        api.ingresses = vec![ingress("default", "shop"), ingress("staging", "shop")];
        let config = CollectorConfig {
            include_namespaces: vec!["staging".to_string()],
            ..Default::default()
        };
        let records = IngressCollector::new(Arc::new(api), config).collect().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].namespace.as_deref(), Some("staging"));
    }
}
