//! Prometheus instant queries
//!
//! Observers build PromQL; `MetricsQuerier` executes it and reduces the
//! instant vector to the first sample's value.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metrics server address {0}")]
    InvalidAddress(String),

    #[error("Prometheus HTTP error: {0}")]
    Http(String),

    #[error("Prometheus query failed: {0}")]
    QueryFailed(String),

    #[error("failed to parse Prometheus response: {0}")]
    Parse(String),

    #[error("no values found for query")]
    NoData,
}

#[async_trait]
pub trait MetricsQuerier: Send + Sync {
    /// Run an instant query and return the first sample's value
    async fn query(&self, query: &str) -> Result<f64, MetricsError>;
}

/// Prometheus `/api/v1/query` response envelope
#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    #[serde(default)]
    data: Option<PrometheusData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    #[serde(default)]
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    value: (f64, String), // [timestamp, value_as_string]
}

/// Extract the first sample of an instant-vector response
pub(crate) fn parse_instant_query(body: &str) -> Result<f64, MetricsError> {
    let response: PrometheusResponse = serde_json::from_str(body)
        .map_err(|e| MetricsError::Parse(format!("invalid JSON: {e}")))?;

    if response.status != "success" {
        return Err(MetricsError::QueryFailed(
            response
                .error
                .unwrap_or_else(|| format!("status {}", response.status)),
        ));
    }

    let result = response
        .data
        .and_then(|d| d.result.into_iter().next())
        .ok_or(MetricsError::NoData)?;

    let value = result
        .value
        .1
        .parse::<f64>()
        .map_err(|e| MetricsError::Parse(format!("invalid value {:?}: {e}", result.value.1)))?;

    // Division by a zero request rate yields NaN
    if !value.is_finite() {
        return Err(MetricsError::NoData);
    }
    Ok(value)
}

pub struct PrometheusClient {
    client: reqwest::Client,
    address: String,
}

impl PrometheusClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, MetricsError> {
        reqwest::Url::parse(address)
            .map_err(|e| MetricsError::InvalidAddress(format!("{address}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetricsError::Http(e.to_string()))?;
        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl MetricsQuerier for PrometheusClient {
    async fn query(&self, query: &str) -> Result<f64, MetricsError> {
        let url = format!("{}/api/v1/query", self.address);
        debug!(query = %query, "Querying Prometheus");

        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| MetricsError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MetricsError::Http(e.to_string()))?;

        if !status.is_success() {
            // Bad queries come back as 4xx with an error envelope
            return match parse_instant_query(&body) {
                Err(e @ MetricsError::QueryFailed(_)) => Err(e),
                _ => Err(MetricsError::Http(format!("{status}: {body}"))),
            };
        }

        parse_instant_query(&body)
    }
}

/// Records queries and answers with a fixed value
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub struct MockQuerier {
    value: Result<f64, String>,
    queries: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockQuerier {
    pub fn returning(value: f64) -> Self {
        Self {
            value: Ok(value),
            queries: std::sync::Mutex::new(vec![]),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            value: Err(message.to_string()),
            queries: std::sync::Mutex::new(vec![]),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl MetricsQuerier for MockQuerier {
    async fn query(&self, query: &str) -> Result<f64, MetricsError> {
        self.queries.lock().unwrap().push(query.to_string());
        self.value.clone().map_err(MetricsError::Http)
    }
}

#[cfg(test)]
#[path = "prometheus_test.rs"]
pub(crate) mod tests;
