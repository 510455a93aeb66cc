//! Outbound wire contract with the billing service.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::cluster::ClusterContext;
use crate::error::{Error, Result};
use crate::parsing::parse_interval;
use crate::types::{ResourceMetrics, Severity};

pub const METRICS_PATH: &str = "/v1/metrics";
pub const EVENTS_PATH: &str = "/v1/metrics/events";
const API_KEY_HEADER: &str = "X-API-Key";

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn send_metrics(&self, batch: &[ResourceMetrics]) -> Result<()>;
    async fn send_events(&self, cluster_id: &str, context: &ClusterContext, events: &[ResourceMetrics]) -> Result<()>;
    async fn fetch_cluster_config(&self, cluster_id: &str) -> Result<RemoteClusterConfig>;
}

/// Builds a sink once the API key has been read from its secret.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn create(&self, api_key: String) -> Result<Arc<dyn MetricsSink>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSourcePayload {
    pub component: String,
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventInvolvedObject {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMetadata {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub creation_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMetrics {
    pub count: i32,
    pub first_timestamp: String,
    pub last_timestamp: String,
    pub duration_seconds: i64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventResource {
    pub namespace: String,
    pub name: String,
    /// Not carried on collected records; always empty.
    pub uid: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub source: EventSourcePayload,
    pub involved_object: EventInvolvedObject,
    pub metadata: EventMetadata,
    pub metrics: EventMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventBatch<'a> {
    pub cluster_id: &'a str,
    pub context: &'a ClusterContext,
    pub collected_at: DateTime<Utc>,
    pub resources: Vec<EventResource>,
}

fn rfc3339(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)).unwrap_or_default()
}

/// Records without an event status are skipped.
pub fn event_resource(record: &ResourceMetrics) -> Option<EventResource> {
    let status = record.event_status()?;
    Some(EventResource {
        namespace: record.namespace.clone().unwrap_or_default(),
        name: record.name.clone(),
        uid: String::new(),
        event_type: status.event_type.clone(),
        reason: status.reason.clone(),
        message: status.message.clone(),
        source: EventSourcePayload {
            component: status.source.component.clone(),
            host: status.source.host.clone(),
        },
        involved_object: EventInvolvedObject {
            kind: status.involved_object.kind.clone(),
            namespace: status.involved_object.namespace.clone(),
            name: status.involved_object.name.clone(),
            uid: status.involved_object.uid.clone(),
        },
        metadata: EventMetadata {
            labels: record.labels.clone(),
            annotations: BTreeMap::new(),
            creation_timestamp: rfc3339(Some(record.collected_at)),
        },
        metrics: EventMetrics {
            count: status.count,
            first_timestamp: rfc3339(status.first_timestamp),
            last_timestamp: rfc3339(status.last_timestamp),
            duration_seconds: status.duration_seconds,
            severity: status.severity,
        },
    })
}

/// Go-style durations arrive as integer nanoseconds; strings such as "10m"
/// are accepted as well.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IntervalValue {
    Nanos(u64),
    Text(String),
}

impl IntervalValue {
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            IntervalValue::Nanos(0) => None,
            IntervalValue::Nanos(n) => Some(Duration::from_nanos(*n)),
            IntervalValue::Text(s) => parse_interval(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostingConfiguration {
    pub currency: String,
    pub cpu_cost_per_core: f64,
    #[serde(rename = "memoryCostPerGB")]
    pub memory_cost_per_gb: f64,
    #[serde(rename = "storageCostPerGB")]
    pub storage_cost_per_gb: f64,
    #[serde(rename = "networkCostPerGB")]
    pub network_cost_per_gb: f64,
    pub custom_cost_factors: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlertingRule {
    pub name: String,
    pub description: String,
    pub metric: String,
    pub threshold: f64,
    pub operator: String,
    pub duration: Option<IntervalValue>,
    pub labels: BTreeMap<String, String>,
    pub severity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CustomMetricConfig {
    pub name: String,
    pub query: String,
    pub labels: BTreeMap<String, String>,
}

/// Server-side overrides for one cluster. Absent fields leave local
/// settings untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteClusterConfig {
    pub collection_interval: Option<IntervalValue>,
    pub include_namespaces: Option<Vec<String>>,
    pub exclude_namespaces: Option<Vec<String>>,
    pub resource_types: Option<Vec<String>>,
    pub costing_configuration: Option<CostingConfiguration>,
    pub alerting_rules: Vec<AlertingRule>,
    pub custom_metrics: Vec<CustomMetricConfig>,
}

/// HTTP client for the billing service.
pub struct BillingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BillingClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let payload = serde_json::to_vec(body)?;
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            error!(endpoint = path, status = %status, body = %body, "Billing service rejected payload");
            return Err(Error::SinkStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for BillingClient {
    async fn send_metrics(&self, batch: &[ResourceMetrics]) -> Result<()> {
        self.post_json(METRICS_PATH, batch).await?;
        debug!(count = batch.len(), "Sent resource metrics");
        Ok(())
    }

    async fn send_events(&self, cluster_id: &str, context: &ClusterContext, events: &[ResourceMetrics]) -> Result<()> {
        let payload = EventBatch {
            cluster_id,
            context,
            collected_at: Utc::now(),
            resources: events.iter().filter_map(event_resource).collect(),
        };
        self.post_json(EVENTS_PATH, &payload).await?;
        debug!(count = payload.resources.len(), "Sent event metrics");
        Ok(())
    }

    async fn fetch_cluster_config(&self, cluster_id: &str) -> Result<RemoteClusterConfig> {
        let path = format!("/v1/clusters/{}/config", cluster_id);
        let url = format!("{}{}", self.base_url, path);
        let res = self.http.get(&url).header(API_KEY_HEADER, &self.api_key).send().await?;
        if res.status() != StatusCode::OK {
            return Err(Error::SinkStatus {
                endpoint: path,
                status: res.status().as_u16(),
            });
        }
        let body = res.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

pub struct BillingSinkFactory {
    base_url: String,
    timeout: Duration,
}

impl BillingSinkFactory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SinkFactory for BillingSinkFactory {
    async fn create(&self, api_key: String) -> Result<Arc<dyn MetricsSink>> {
        let client = BillingClient::new(&self.base_url, api_key, self.timeout)?;
        Ok(Arc::new(client))
    }
}

/// Recording sink for tests and dry runs.
pub mod mock {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        pub metrics: Mutex<Vec<Vec<ResourceMetrics>>>,
        pub events: Mutex<Vec<Vec<ResourceMetrics>>>,
        pub remote: Option<RemoteClusterConfig>,
        pub fail_metrics: bool,
        pub fail_events: bool,
    }

    impl RecordingSink {
        pub async fn metric_batches(&self) -> Vec<Vec<ResourceMetrics>> {
            self.metrics.lock().await.clone()
        }

        pub async fn event_batches(&self) -> Vec<Vec<ResourceMetrics>> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl MetricsSink for RecordingSink {
        async fn send_metrics(&self, batch: &[ResourceMetrics]) -> Result<()> {
            self.metrics.lock().await.push(batch.to_vec());
            if self.fail_metrics {
                return Err(Error::SinkStatus {
                    endpoint: METRICS_PATH.to_string(),
                    status: 503,
                });
            }
            Ok(())
        }

        async fn send_events(&self, _cluster_id: &str, _context: &ClusterContext, events: &[ResourceMetrics]) -> Result<()> {
            self.events.lock().await.push(events.to_vec());
            if self.fail_events {
                return Err(Error::SinkStatus {
                    endpoint: EVENTS_PATH.to_string(),
                    status: 503,
                });
            }
            Ok(())
        }

        async fn fetch_cluster_config(&self, cluster_id: &str) -> Result<RemoteClusterConfig> {
            self.remote.clone().ok_or_else(|| Error::SinkStatus {
                endpoint: format!("/v1/clusters/{}/config", cluster_id),
                status: 404,
            })
        }
    }

    /// Hands out one shared sink and remembers the keys it was asked for.
    pub struct StaticSinkFactory {
        pub sink: Arc<RecordingSink>,
        pub keys: Mutex<Vec<String>>,
    }

    impl StaticSinkFactory {
        pub fn new(sink: Arc<RecordingSink>) -> Self {
            Self {
                sink,
                keys: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SinkFactory for StaticSinkFactory {
        async fn create(&self, api_key: String) -> Result<Arc<dyn MetricsSink>> {
            self.keys.lock().await.push(api_key);
            Ok(self.sink.clone())
        }
    }
}
