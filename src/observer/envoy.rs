//! Envoy sidecar metrics, as scraped from App Mesh pods

use super::prometheus::{MetricsError, MetricsQuerier};
use super::{latency, LatencyUnit, Observer};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

pub struct EnvoyObserver {
    querier: Arc<dyn MetricsQuerier>,
}

impl EnvoyObserver {
    pub fn new(querier: Arc<dyn MetricsQuerier>) -> Self {
        Self { querier }
    }

    pub fn success_rate_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#" sum( rate( envoy_cluster_upstream_rq{{ kubernetes_namespace="{namespace}", kubernetes_pod_name=~"{name}-[0-9a-zA-Z]+(-[0-9a-zA-Z]+)", envoy_response_code!~"5.*" }}[{interval}] ) ) / sum( rate( envoy_cluster_upstream_rq{{ kubernetes_namespace="{namespace}", kubernetes_pod_name=~"{name}-[0-9a-zA-Z]+(-[0-9a-zA-Z]+)" }}[{interval}] ) ) * 100"#
        )
    }

    pub fn duration_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#" histogram_quantile( 0.99, sum( rate( envoy_cluster_upstream_rq_time_bucket{{ kubernetes_namespace="{namespace}", kubernetes_pod_name=~"{name}-[0-9a-zA-Z]+(-[0-9a-zA-Z]+)" }}[{interval}] ) ) by (le) )"#
        )
    }
}

#[async_trait]
impl Observer for EnvoyObserver {
    fn name(&self) -> &'static str {
        "envoy"
    }

    async fn request_success_rate(
        &self,
        name: &str,
        namespace: &str,
        interval: &str,
    ) -> Result<f64, MetricsError> {
        self.querier
            .query(&Self::success_rate_query(name, namespace, interval))
            .await
    }

    async fn request_duration(
        &self,
        name: &str,
        namespace: &str,
        interval: &str,
    ) -> Result<Duration, MetricsError> {
        let value = self
            .querier
            .query(&Self::duration_query(name, namespace, interval))
            .await?;
        latency(value, LatencyUnit::Milliseconds)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
