use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    Endpoints, Event, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{api::ListParams, Api, Client};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;

use crate::error::{Error, Result};

/// Read access to the cluster. Lists span all namespaces; callers filter.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_pods(&self) -> Result<Vec<Pod>>;
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>>;
    async fn list_persistent_volume_claims(&self) -> Result<Vec<PersistentVolumeClaim>>;
    async fn list_services(&self) -> Result<Vec<Service>>;
    async fn list_endpoints(&self) -> Result<Vec<Endpoints>>;
    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;
    async fn list_deployments(&self) -> Result<Vec<Deployment>>;
    async fn list_stateful_sets(&self) -> Result<Vec<StatefulSet>>;
    async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>>;
    async fn list_ingresses(&self) -> Result<Vec<Ingress>>;
    async fn list_events(&self) -> Result<Vec<Event>>;
    async fn server_version(&self) -> Result<String>;
    async fn get_secret(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>>;
}

pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_all<K>(&self) -> Result<Vec<K>>
    where
        K: kube::Resource + Clone + DeserializeOwned + Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        self.list_all().await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.list_all().await
    }

    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>> {
        self.list_all().await
    }

    async fn list_persistent_volume_claims(&self) -> Result<Vec<PersistentVolumeClaim>> {
        self.list_all().await
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.list_all().await
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoints>> {
        self.list_all().await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.list_all().await
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        self.list_all().await
    }

    async fn list_stateful_sets(&self) -> Result<Vec<StatefulSet>> {
        self.list_all().await
    }

    async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>> {
        self.list_all().await
    }

    async fn list_ingresses(&self) -> Result<Vec<Ingress>> {
        self.list_all().await
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        self.list_all().await
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    async fn get_secret(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(s) => s,
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                return Err(Error::Config(format!("secret {}/{} not found", namespace, name)));
            }
            Err(e) => return Err(e.into()),
        };
        secret
            .data
            .and_then(|mut data| data.remove(key))
            .map(|bytes| bytes.0)
            .ok_or_else(|| Error::Config(format!("key {} not found in secret {}/{}", key, namespace, name)))
    }
}

/// In-memory cluster for tests and dry runs. Resources named in `failing`
/// (plural API names such as "pods") return an error when listed.
#[derive(Debug, Clone)]
pub struct MockClusterApi {
    pub pods: Vec<Pod>,
    pub nodes: Vec<Node>,
    pub persistent_volumes: Vec<PersistentVolume>,
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
    pub services: Vec<Service>,
    pub endpoints: Vec<Endpoints>,
    pub namespaces: Vec<Namespace>,
    pub deployments: Vec<Deployment>,
    pub stateful_sets: Vec<StatefulSet>,
    pub daemon_sets: Vec<DaemonSet>,
    pub ingresses: Vec<Ingress>,
    pub events: Vec<Event>,
    pub version: String,
    secrets: HashMap<(String, String), BTreeMap<String, Vec<u8>>>,
    failing: HashSet<&'static str>,
}

impl Default for MockClusterApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClusterApi {
    pub fn new() -> Self {
        Self {
            pods: Vec::new(),
            nodes: Vec::new(),
            persistent_volumes: Vec::new(),
            persistent_volume_claims: Vec::new(),
            services: Vec::new(),
            endpoints: Vec::new(),
            namespaces: Vec::new(),
            deployments: Vec::new(),
            stateful_sets: Vec::new(),
            daemon_sets: Vec::new(),
            ingresses: Vec::new(),
            events: Vec::new(),
            version: "v1.26.0".to_string(),
            secrets: HashMap::new(),
            failing: HashSet::new(),
        }
    }

    pub fn with_secret(mut self, namespace: &str, name: &str, key: &str, value: &[u8]) -> Self {
        self.secrets
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), value.to_vec());
        self
    }

    pub fn failing(mut self, resource: &'static str) -> Self {
        self.failing.insert(resource);
        self
    }

    fn check(&self, resource: &'static str) -> Result<()> {
        if self.failing.contains(resource) {
            return Err(Error::Unavailable(resource.to_string()));
        }
        Ok(())
    }

    fn listed<T: Clone>(&self, resource: &'static str, items: &[T]) -> Result<Vec<T>> {
        self.check(resource)?;
        Ok(items.to_vec())
    }
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        self.listed("pods", &self.pods)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.listed("nodes", &self.nodes)
    }

    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>> {
        self.listed("persistentvolumes", &self.persistent_volumes)
    }

    async fn list_persistent_volume_claims(&self) -> Result<Vec<PersistentVolumeClaim>> {
        self.listed("persistentvolumeclaims", &self.persistent_volume_claims)
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.listed("services", &self.services)
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoints>> {
        self.listed("endpoints", &self.endpoints)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.listed("namespaces", &self.namespaces)
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        self.listed("deployments", &self.deployments)
    }

    async fn list_stateful_sets(&self) -> Result<Vec<StatefulSet>> {
        self.listed("statefulsets", &self.stateful_sets)
    }

    async fn list_daemon_sets(&self) -> Result<Vec<DaemonSet>> {
        self.listed("daemonsets", &self.daemon_sets)
    }

    async fn list_ingresses(&self) -> Result<Vec<Ingress>> {
        self.listed("ingresses", &self.ingresses)
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        self.listed("events", &self.events)
    }

    async fn server_version(&self) -> Result<String> {
        self.check("version")?;
        Ok(self.version.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>> {
        self.check("secrets")?;
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::Config(format!("secret {}/{} not found", namespace, name)))?
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Config(format!("key {} not found in secret {}/{}", key, namespace, name)))
    }
}
