use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{TimeSeriesApi, VectorSample};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<RawSample>),
    Scalar((f64, String)),
    Matrix(serde_json::Value),
    #[serde(rename = "string")]
    Text(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct RawSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// Instant queries against a Prometheus HTTP API.
pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
}

impl PrometheusClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::UsageSource(format!("build Prometheus client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn into_samples(response: QueryResponse) -> Result<Vec<VectorSample>> {
    if response.status != "success" {
        return Err(Error::UsageSource(
            response.error.unwrap_or_else(|| format!("query status {}", response.status)),
        ));
    }
    let samples = match response.data {
        Some(QueryData::Vector(raw)) => raw
            .into_iter()
            .filter_map(|s| {
                parse_value(&s.value.1).map(|value| VectorSample {
                    labels: s.metric,
                    value,
                })
            })
            .collect(),
        Some(QueryData::Scalar((_, raw))) => parse_value(&raw)
            .map(|value| VectorSample {
                labels: BTreeMap::new(),
                value,
            })
            .into_iter()
            .collect(),
        Some(QueryData::Matrix(_)) | Some(QueryData::Text(_)) => {
            return Err(Error::UsageSource("unexpected result type for instant query".to_string()))
        }
        None => Vec::new(),
    };
    Ok(samples)
}

#[async_trait]
impl TimeSeriesApi for PrometheusClient {
    async fn instant_query(&self, promql: &str, at: DateTime<Utc>) -> Result<Vec<VectorSample>> {
        let url = format!("{}/api/v1/query", self.base_url);
        let time = format!("{:.3}", at.timestamp_millis() as f64 / 1000.0);
        debug!(query = promql, "Prometheus instant query");

        let res = self
            .http
            .get(&url)
            .query(&[("query", promql), ("time", time.as_str())])
            .send()
            .await
            .map_err(|e| Error::UsageSource(format!("{}: {}", url, e)))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| Error::UsageSource(format!("{}: {}", url, e)))?;
        // Prometheus reports query errors with a 4xx and a JSON error body.
        let parsed: QueryResponse = serde_json::from_str(&body)
            .map_err(|_| Error::UsageSource(format!("{} returned {}", url, status)))?;
        into_samples(parsed)
    }
}
