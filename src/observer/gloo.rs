//! Gloo gateway metrics, matched on the canary upstream's envoy cluster

use super::prometheus::{MetricsError, MetricsQuerier};
use super::{latency, LatencyUnit, Observer};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

pub struct GlooObserver {
    querier: Arc<dyn MetricsQuerier>,
}

impl GlooObserver {
    pub fn new(querier: Arc<dyn MetricsQuerier>) -> Self {
        Self { querier }
    }

    pub fn success_rate_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"sum(rate(envoy_cluster_upstream_rq{{envoy_cluster_name=~"{namespace}-{name}-canary-[0-9a-zA-Z-]+",envoy_response_code!~"5.*"}}[{interval}])) / sum(rate(envoy_cluster_upstream_rq{{envoy_cluster_name=~"{namespace}-{name}-canary-[0-9a-zA-Z-]+"}}[{interval}])) * 100"#
        )
    }

    pub fn duration_query(name: &str, namespace: &str, interval: &str) -> String {
        format!(
            r#"histogram_quantile(0.99, sum(rate(envoy_cluster_upstream_rq_time_bucket{{envoy_cluster_name=~"{namespace}-{name}-canary-[0-9a-zA-Z-]+"}}[{interval}])) by (le))"#
        )
    }
}

#[async_trait]
impl Observer for GlooObserver {
    fn name(&self) -> &'static str {
        "gloo"
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
