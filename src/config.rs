use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::cluster::ClusterIdentity;
use crate::collector::CollectorKind;
use crate::cost::CostRates;
use crate::parsing::{parse_bool, parse_interval, parse_key_value_list, parse_list};

/// Collections never run more often than this, whatever is configured.
pub const MIN_COLLECTION_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(300);

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Settings shared by every collector.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    /// Stamped onto every emitted record; object labels win on conflict.
    pub include_labels: BTreeMap<String, String>,
    pub collection_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            include_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            include_labels: BTreeMap::new(),
            collection_interval: DEFAULT_COLLECTION_INTERVAL,
        }
    }
}

pub fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_COLLECTION_INTERVAL)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageSourceConfig {
    pub prometheus_url: Option<String>,
    pub metrics_server: bool,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: SecretRef,
    pub collector: CollectorConfig,
    pub enabled_collectors: Vec<CollectorKind>,
    pub usage: UsageSourceConfig,
    pub cost: CostRates,
    pub cluster: ClusterIdentity,
    pub pull_remote_config: bool,
    pub sink_timeout: Duration,
}

pub fn load_config() -> Result<ConnectorConfig> {
    load_config_with_env(&SystemEnvironment)
}

pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Result<ConnectorConfig> {
    let base_url = env
        .get_var("SAAS_BASE_URL")
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("SAAS_BASE_URL must be set"))?;
    let base_url = base_url.trim().trim_end_matches('/').to_string();

    let api_key = SecretRef {
        name: env
            .get_var("API_KEY_SECRET_NAME")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("API_KEY_SECRET_NAME must reference the API key Secret"))?,
        key: env.get_var("API_KEY_SECRET_KEY").unwrap_or_else(|| "api-key".to_string()),
        namespace: env
            .get_var("API_KEY_SECRET_NAMESPACE")
            .unwrap_or_else(|| "default".to_string()),
    };

    let interval = match env.get_var("COLLECTION_INTERVAL") {
        Some(raw) => parse_interval(&raw)
            .ok_or_else(|| anyhow!("Invalid COLLECTION_INTERVAL: {:?}", raw))?,
        None => DEFAULT_COLLECTION_INTERVAL,
    };

    let collector = CollectorConfig {
        include_namespaces: env.get_var("INCLUDE_NAMESPACES").map(|v| parse_list(&v)).unwrap_or_default(),
        exclude_namespaces: env
            .get_var("EXCLUDE_NAMESPACES")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|| vec!["kube-system".to_string()]),
        include_labels: parse_labels(env, "INCLUDE_LABELS")?,
        collection_interval: clamp_interval(interval),
    };

    let enabled_collectors = match env.get_var("COLLECTORS") {
        Some(raw) => parse_list(&raw)
            .iter()
            .map(|name| {
                CollectorKind::from_name(name).ok_or_else(|| anyhow!("Unknown collector in COLLECTORS: {}", name))
            })
            .collect::<Result<Vec<_>>>()?,
        None => CollectorKind::ALL.to_vec(),
    };

    let prometheus_url = env.get_var("PROMETHEUS_URL").filter(|v| !v.trim().is_empty());
    let metrics_server = env
        .get_var("METRICS_SERVER_ENABLED")
        .map(|v| parse_bool(&v))
        // without a time-series backend the metrics API is the only usage source
        .unwrap_or(prometheus_url.is_none());
    let query_timeout = parse_duration_var(env, "PROMETHEUS_QUERY_TIMEOUT", Duration::from_secs(30))?;

    let cluster = ClusterIdentity {
        name: env
            .get_var("CLUSTER_NAME")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("CLUSTER_NAME must be set"))?,
        provider: env.get_var("CLUSTER_PROVIDER").unwrap_or_default(),
        region: env.get_var("CLUSTER_REGION").unwrap_or_default(),
        zone: env.get_var("CLUSTER_ZONE").unwrap_or_default(),
        labels: parse_labels(env, "CLUSTER_LABELS")?,
        metadata: parse_labels(env, "CLUSTER_METADATA")?,
    };

    Ok(ConnectorConfig {
        name: env.get_var("CONNECTOR_NAME").unwrap_or_else(|| "default".to_string()),
        base_url,
        api_key,
        collector,
        enabled_collectors,
        usage: UsageSourceConfig {
            prometheus_url,
            metrics_server,
            query_timeout,
        },
        cost: load_cost_rates(env)?,
        cluster,
        pull_remote_config: env.get_var("PULL_REMOTE_CONFIG").map(|v| parse_bool(&v)).unwrap_or(false),
        sink_timeout: parse_duration_var(env, "SINK_TIMEOUT", Duration::from_secs(30))?,
    })
}

fn load_cost_rates<E: EnvironmentProvider>(env: &E) -> Result<CostRates> {
    let mut rates = CostRates::default();
    if let Some(currency) = env.get_var("COST_CURRENCY").filter(|v| !v.trim().is_empty()) {
        rates.currency = currency.trim().to_string();
    }
    let overrides: [(&str, &mut f64); 5] = [
        ("COST_CPU_PER_CORE_HOUR", &mut rates.cpu_per_core_hour),
        ("COST_MEMORY_PER_GB_HOUR", &mut rates.memory_per_gb_hour),
        ("COST_STORAGE_DEFAULT_PER_GB_HOUR", &mut rates.storage_default_per_gb_hour),
        ("COST_LOAD_BALANCER_PER_HOUR", &mut rates.load_balancer_per_hour),
        ("COST_NODE_PORT_PER_HOUR", &mut rates.node_port_per_hour),
    ];
    for (key, slot) in overrides {
        if let Some(raw) = env.get_var(key) {
            let value: f64 = raw.trim().parse().with_context(|| format!("Invalid {}", key))?;
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("Invalid {}: rates must be non-negative", key));
            }
            *slot = value;
        }
    }
    Ok(rates)
}

fn parse_labels<E: EnvironmentProvider>(env: &E, key: &str) -> Result<BTreeMap<String, String>> {
    match env.get_var(key) {
        Some(raw) => parse_key_value_list(&raw).ok_or_else(|| anyhow!("Invalid {}: expected k=v,k=v", key)),
        None => Ok(BTreeMap::new()),
    }
}

fn parse_duration_var<E: EnvironmentProvider>(env: &E, key: &str, default: Duration) -> Result<Duration> {
    match env.get_var(key) {
        Some(raw) => parse_interval(&raw).ok_or_else(|| anyhow!("Invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> MockEnvironment {
        MockEnvironment::new()
            .with_var("SAAS_BASE_URL", "https://billing.example.com/")
            .with_var("API_KEY_SECRET_NAME", "connector-api-key")
            .with_var("CLUSTER_NAME", "prod-eu")
    }

    #[test]
    fn test_config_loading_defaults() {
        let config = load_config_with_env(&minimal()).unwrap();

        assert_eq!(config.base_url, "https://billing.example.com");
        assert_eq!(config.name, "default");
        assert_eq!(config.api_key.key, "api-key");
        assert_eq!(config.api_key.namespace, "default");
        assert_eq!(config.collector.collection_interval, DEFAULT_COLLECTION_INTERVAL);
        assert!(config.collector.include_namespaces.is_empty());
        assert_eq!(config.collector.exclude_namespaces, vec!["kube-system"]);
        assert_eq!(config.enabled_collectors, CollectorKind::ALL.to_vec());
        assert!(config.usage.prometheus_url.is_none());
        assert!(config.usage.metrics_server);
        assert_eq!(config.cost, CostRates::default());
        assert!(!config.pull_remote_config);
    }

    #[test]
    fn test_config_loading_with_env() {
        let env = minimal()
            .with_var("CONNECTOR_NAME", "eu-connector")
            .with_var("API_KEY_SECRET_KEY", "token")
            .with_var("API_KEY_SECRET_NAMESPACE", "hakongo")
            .with_var("COLLECTION_INTERVAL", "15m")
            .with_var("INCLUDE_NAMESPACES", "default, payments")
            .with_var("EXCLUDE_NAMESPACES", "")
            .with_var("INCLUDE_LABELS", "team=platform")
            .with_var("COLLECTORS", "pod,node,event")
            .with_var("PROMETHEUS_URL", "http://prometheus:9090")
            .with_var("COST_CURRENCY", "EUR")
            .with_var("COST_CPU_PER_CORE_HOUR", "0.05")
            .with_var("CLUSTER_PROVIDER", "aws")
            .with_var("CLUSTER_REGION", "eu-west-1")
            .with_var("CLUSTER_LABELS", "env=prod")
            .with_var("PULL_REMOTE_CONFIG", "true");

        let config = load_config_with_env(&env).unwrap();
        assert_eq!(config.name, "eu-connector");
        assert_eq!(config.api_key.namespace, "hakongo");
        assert_eq!(config.collector.collection_interval, Duration::from_secs(900));
        assert_eq!(config.collector.include_namespaces, vec!["default", "payments"]);
        assert!(config.collector.exclude_namespaces.is_empty());
        assert_eq!(config.collector.include_labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(
            config.enabled_collectors,
            vec![CollectorKind::Pod, CollectorKind::Node, CollectorKind::Event]
        );
        assert_eq!(config.usage.prometheus_url.as_deref(), Some("http://prometheus:9090"));
        assert!(!config.usage.metrics_server);
        assert_eq!(config.cost.currency, "EUR");
        assert_eq!(config.cost.cpu_per_core_hour, 0.05);
        assert_eq!(config.cluster.provider, "aws");
        assert_eq!(config.cluster.labels.get("env").map(String::as_str), Some("prod"));
        assert!(config.pull_remote_config);
    }

    #[test]
    fn test_interval_floor_enforced() {
        let env = minimal().with_var("COLLECTION_INTERVAL", "30s");
        let config = load_config_with_env(&env).unwrap();
        assert_eq!(config.collector.collection_interval, MIN_COLLECTION_INTERVAL);
    }

    #[test]
    fn test_config_loading_missing_required() {
        for missing in ["SAAS_BASE_URL", "API_KEY_SECRET_NAME", "CLUSTER_NAME"] {
            let mut env = MockEnvironment::new();
            for key in ["SAAS_BASE_URL", "API_KEY_SECRET_NAME", "CLUSTER_NAME"] {
                if key != missing {
                    env.set_var(key, "value");
                }
            }
            let result = load_config_with_env(&env);
            assert!(result.is_err());
            assert!(result.unwrap_err().to_string().contains(missing), "missing {}", missing);
        }
    }

    #[test]
    fn test_malformed_values_rejected() {
        let env = minimal().with_var("COLLECTION_INTERVAL", "soon");
        let err = load_config_with_env(&env).unwrap_err();
        assert!(err.to_string().contains("COLLECTION_INTERVAL"));

        let env = minimal().with_var("COST_MEMORY_PER_GB_HOUR", "cheap");
        let err = load_config_with_env(&env).unwrap_err();
        assert!(err.to_string().contains("COST_MEMORY_PER_GB_HOUR"));

        let env = minimal().with_var("COST_NODE_PORT_PER_HOUR", "-1");
        assert!(load_config_with_env(&env).is_err());

        let env = minimal().with_var("COLLECTORS", "pod,gpu");
        let err = load_config_with_env(&env).unwrap_err();
        assert!(err.to_string().contains("gpu"));

        let env = minimal().with_var("CLUSTER_LABELS", "broken");
        assert!(load_config_with_env(&env).is_err());
    }

    #[test]
    fn test_metrics_server_toggle() {
        let env = minimal()
            .with_var("PROMETHEUS_URL", "http://prometheus:9090")
            .with_var("METRICS_SERVER_ENABLED", "1");
        let config = load_config_with_env(&env).unwrap();
        assert!(config.usage.metrics_server);

        let env = minimal().with_var("METRICS_SERVER_ENABLED", "no");
        let config = load_config_with_env(&env).unwrap();
        assert!(!config.usage.metrics_server);
    }
}
